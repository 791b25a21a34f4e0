use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::{now_ms, Engine, EngineError};

impl Engine {
    /// Book an available room.
    ///
    /// The availability flag is the room's guard: the check, the booking
    /// record and the flip to unavailable happen under the room's write lock
    /// and commit as one WAL event, so of any number of racing callers exactly
    /// one sees the room available.
    pub async fn book(&self, room_id: Ulid, user_id: Ulid, floor_id: Ulid) -> Result<Booked, EngineError> {
        let guard = self.lock_room(room_id).await?;
        self.require_user(user_id)?;
        if guard.floor_id != floor_id {
            return Err(EngineError::FloorMismatch {
                room_id,
                requested: floor_id,
                actual: guard.floor_id,
            });
        }
        if !guard.availability {
            metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "unavailable").increment(1);
            debug!(%room_id, %user_id, "booking refused: room unavailable");
            return Err(EngineError::Unavailable(room_id));
        }

        let booking = Booking {
            id: Ulid::new(),
            user_id,
            floor_id,
            room_id,
            booked_at: now_ms(),
        };
        let guard = self
            .commit_room(guard, Event::RoomBooked { booking: booking.clone() })
            .await?;

        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "booked").increment(1);
        debug!(%room_id, %user_id, booking_id = %booking.id, "room booked");
        Ok(Booked {
            booking,
            room: guard.info(),
        })
    }
}
