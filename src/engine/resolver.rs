use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, Engine, EngineError};

/// Verdict on a proposal's claimed `as_of` relative to the ledger baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject { authoritative_as_of: Ms },
}

/// Last writer wins by claimed timestamp. Equal counts as stale, so a
/// retried request can never apply twice.
pub fn judge(authoritative_as_of: Ms, as_of: Ms) -> Verdict {
    if as_of > authoritative_as_of {
        Verdict::Accept
    } else {
        Verdict::Reject { authoritative_as_of }
    }
}

pub(crate) fn validate_timestamp(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

fn validate_proposal(proposal: &RoomProposal) -> Result<(), EngineError> {
    if proposal.capacity == 0 {
        return Err(EngineError::Invalid("capacity: must be positive"));
    }
    if proposal.capacity > MAX_ROOM_CAPACITY {
        return Err(EngineError::LimitExceeded("room capacity too large"));
    }
    validate_timestamp(proposal.as_of)
}

impl UpdateOutcome {
    /// Collapse a rejection into `EngineError::Conflict` for callers that
    /// treat a stale proposal as a failure.
    pub fn into_applied(self) -> Result<(RoomInfo, VersionEntry), EngineError> {
        match self {
            UpdateOutcome::Applied { room, entry } => Ok((room, entry)),
            UpdateOutcome::Rejected {
                authoritative_as_of,
                entry,
            } => Err(EngineError::Conflict {
                room_id: entry.room_id,
                authoritative_as_of,
            }),
        }
    }
}

impl Engine {
    /// Resolve a proposed room edit against the room's version ledger.
    ///
    /// The baseline read, the verdict, the ledger append and (on acceptance)
    /// the room mutation all happen under the room's write lock and commit as
    /// one WAL event. Rejected attempts are still recorded, with
    /// `accepted = false`, and leave the room untouched.
    pub async fn resolve_update(&self, room_id: Ulid, proposal: RoomProposal) -> Result<UpdateOutcome, EngineError> {
        let guard = self.lock_room(room_id).await?;
        validate_proposal(&proposal)?;
        self.require_user(proposal.user_id)?;
        self.require_floor(proposal.floor_id)?;
        if guard.ledger.len() >= MAX_LEDGER_ENTRIES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many versions on room"));
        }

        let verdict = judge(guard.authoritative_as_of(), proposal.as_of);
        let entry = VersionEntry {
            room_id,
            user_id: proposal.user_id,
            floor_id: proposal.floor_id,
            capacity: proposal.capacity,
            availability: proposal.availability,
            as_of: proposal.as_of,
            recorded_at: now_ms(),
            accepted: verdict == Verdict::Accept,
        };
        let released = if entry.accepted && entry.availability {
            guard.active_booking
        } else {
            None
        };
        let guard = self
            .commit_room(guard, Event::VersionRecorded { entry: entry.clone() })
            .await?;

        match verdict {
            Verdict::Accept => {
                metrics::counter!(crate::observability::UPDATES_TOTAL, "outcome" => "applied").increment(1);
                if let Some(booking_id) = released {
                    info!(%room_id, %booking_id, user_id = %entry.user_id, "update reopened booked room");
                }
                debug!(%room_id, as_of = entry.as_of, "update applied");
                Ok(UpdateOutcome::Applied {
                    room: guard.info(),
                    entry,
                })
            }
            Verdict::Reject { authoritative_as_of } => {
                metrics::counter!(crate::observability::UPDATES_TOTAL, "outcome" => "rejected").increment(1);
                debug!(%room_id, as_of = entry.as_of, authoritative_as_of, "stale update rejected");
                Ok(UpdateOutcome::Rejected {
                    authoritative_as_of,
                    entry,
                })
            }
        }
    }
}
