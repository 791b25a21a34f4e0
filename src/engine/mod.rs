mod booking;
mod error;
mod provision;
mod queries;
mod resolver;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use resolver::{judge, Verdict};

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) struct WalAppend {
    event: Event,
    response: oneshot::Sender<io::Result<()>>,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first append arrives.
/// 2. Drain all immediately available appends (the batch window).
/// 3. Single flush_sync for the whole batch.
/// 4. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalAppend>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(path = %wal.path().display(), "WAL flush of {} events failed: {e}", batch.len());
        }

        for append in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = append.response.send(r);
        }
    }
    tracing::debug!(appends = wal.appends(), "WAL writer stopped");
}

/// Append and fsync a batch. On any failure every record of the batch is cut
/// back off the log, so callers told "failed" never reappear on replay.
fn flush_batch(wal: &mut Wal, batch: &[WalAppend]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|append| wal.append_buffered(&append.event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        if let Err(e) = wal.rollback() {
            tracing::error!(path = %wal.path().display(), "could not roll back failed WAL batch: {e}");
        }
    }
    result
}

async fn append_to_wal(wal_tx: &mpsc::Sender<WalAppend>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalAppend {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

// ── Tables ───────────────────────────────────────────────

#[derive(Default)]
pub(super) struct Tables {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) floors: DashMap<Ulid, FloorState>,
    /// Floor → rooms currently on it.
    pub(super) floor_rooms: DashMap<Ulid, Vec<Ulid>>,
    pub(super) users: DashMap<Ulid, UserInfo>,
    /// Lowercased e-mail → user id.
    pub(super) user_emails: DashMap<String, Ulid>,
    /// Next floor creation sequence. Ulids are random within a millisecond,
    /// so they cannot order floors.
    pub(super) next_floor_seq: AtomicU64,
}

impl Tables {
    fn move_room(&self, room_id: Ulid, from: Ulid, to: Ulid) {
        if let Some(mut rooms) = self.floor_rooms.get_mut(&from) {
            rooms.retain(|r| *r != room_id);
        }
        self.floor_rooms.entry(to).or_default().push(room_id);
    }
}

/// Apply a room-scoped event. Caller holds the room's write lock.
fn apply_to_room(rs: &mut RoomState, event: &Event, tables: &Tables) {
    match event {
        Event::VersionRecorded { entry } => {
            if entry.accepted && entry.floor_id != rs.floor_id {
                tables.move_room(rs.id, rs.floor_id, entry.floor_id);
            }
            rs.record_version(entry.clone());
        }
        Event::RoomBooked { booking } => rs.record_booking(booking.clone()),
        Event::UserRegistered { .. } | Event::FloorCreated { .. } => {}
    }
}

/// Apply a catalog event (users, floors and their provisioned rooms).
fn apply_to_tables(tables: &Tables, event: &Event) {
    match event {
        Event::UserRegistered {
            id,
            name,
            email,
            is_admin,
        } => {
            tables.user_emails.insert(email.to_lowercase(), *id);
            tables.users.insert(
                *id,
                UserInfo {
                    id: *id,
                    name: name.clone(),
                    email: email.clone(),
                    is_admin: *is_admin,
                },
            );
        }
        Event::FloorCreated {
            id,
            name,
            room_ids,
            capacity,
            created_at,
        } => {
            // Rooms first, floor last: a floor is never visible half-provisioned.
            for rid in room_ids {
                let rs = RoomState::new(*rid, *id, *capacity);
                tables.rooms.insert(*rid, Arc::new(RwLock::new(rs)));
            }
            tables.floor_rooms.insert(*id, room_ids.clone());
            tables.floors.insert(
                *id,
                FloorState {
                    id: *id,
                    name: name.clone(),
                    declared_rooms: room_ids.len() as u32,
                    created_at: *created_at,
                    seq: tables.next_floor_seq.fetch_add(1, Ordering::Relaxed),
                },
            );
        }
        Event::VersionRecorded { .. } | Event::RoomBooked { .. } => {}
    }
}

/// Room an event belongs to, for room-scoped events.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::VersionRecorded { entry } => Some(entry.room_id),
        Event::RoomBooked { booking } => Some(booking.room_id),
        Event::UserRegistered { .. } | Event::FloorCreated { .. } => None,
    }
}

pub struct Engine {
    tables: Arc<Tables>,
    wal_tx: mpsc::Sender<WalAppend>,
    notify: Arc<NotifyHub>,
    /// Serializes catalog writes (user and floor creation) so uniqueness and
    /// table-size checks hold until the event is applied.
    catalog_lock: Arc<Mutex<()>>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let tables = Tables::default();

        // We're the sole owner of every room lock here, so try_write always
        // succeeds. Never block: this may run inside an async context.
        for event in &events {
            match event_room_id(event) {
                None => apply_to_tables(&tables, event),
                Some(room_id) => {
                    let Some(rs) = tables.rooms.get(&room_id).map(|e| e.value().clone()) else {
                        tracing::warn!(%room_id, "WAL references unknown room, skipping event");
                        continue;
                    };
                    let mut guard = rs
                        .try_write()
                        .map_err(|_| io::Error::other("replay: room lock contended"))?;
                    apply_to_room(&mut guard, event, &tables);
                }
            }
        }
        tracing::info!(
            path = %wal_path.display(),
            events = events.len(),
            rooms = tables.rooms.len(),
            "engine replayed WAL"
        );

        Ok(Self {
            tables: Arc::new(tables),
            wal_tx,
            notify,
            catalog_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.tables.rooms.get(id).map(|e| e.value().clone())
    }

    /// Receive every event committed on a room from now on.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(room_id)
    }

    /// Look up a room and take its write lock, the row lock for
    /// read-check-write operations.
    pub(super) async fn lock_room(&self, id: Ulid) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .get_room_state(&id)
            .ok_or(EngineError::room_not_found(id))?;
        Ok(rs.write_owned().await)
    }

    pub(super) async fn lock_catalog(&self) -> OwnedMutexGuard<()> {
        self.catalog_lock.clone().lock_owned().await
    }

    /// WAL-append + apply + notify for a room event, holding the room lock
    /// throughout. Runs on its own task so a dropped caller cannot leave the
    /// event durable but unapplied; the guard is handed back on success.
    pub(super) async fn commit_room(
        &self,
        mut guard: OwnedRwLockWriteGuard<RoomState>,
        event: Event,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let tables = self.tables.clone();
        let wal_tx = self.wal_tx.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            append_to_wal(&wal_tx, &event).await?;
            apply_to_room(&mut guard, &event, &tables);
            notify.send(guard.id, &event);
            Ok::<_, EngineError>(guard)
        })
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    /// WAL-append + apply for a catalog event while the catalog lock is held.
    pub(super) async fn commit_catalog(&self, held: OwnedMutexGuard<()>, event: Event) -> Result<(), EngineError> {
        let tables = self.tables.clone();
        let wal_tx = self.wal_tx.clone();
        tokio::spawn(async move {
            let _held = held;
            append_to_wal(&wal_tx, &event).await?;
            apply_to_tables(&tables, &event);
            Ok::<_, EngineError>(())
        })
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    pub(super) fn require_user(&self, id: Ulid) -> Result<(), EngineError> {
        if self.tables.users.contains_key(&id) {
            Ok(())
        } else {
            Err(EngineError::user_not_found(id))
        }
    }

    pub(super) fn require_floor(&self, id: Ulid) -> Result<(), EngineError> {
        if self.tables.floors.contains_key(&id) {
            Ok(())
        } else {
            Err(EngineError::floor_not_found(id))
        }
    }
}
