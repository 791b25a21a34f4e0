use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-room change feeds.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events on a room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a notification. No-op if nobody is listening; a channel whose
    /// receivers are all gone is dropped.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        let closed = match self.channels.get(&room_id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => return,
        };
        if closed {
            self.channels.remove_if(&room_id, |_, s| s.receiver_count() == 0);
        }
    }
}
