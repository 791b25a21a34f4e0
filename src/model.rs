use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::LEDGER_EPOCH_MS;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// One update attempt against a room, accepted or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub floor_id: Ulid,
    pub capacity: u32,
    pub availability: bool,
    /// Client-claimed "as of" time of the state the proposal was based on.
    pub as_of: Ms,
    /// Server time the attempt was recorded.
    pub recorded_at: Ms,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub floor_id: Ulid,
    pub room_id: Ulid,
    pub booked_at: Ms,
}

/// Proposed room edit as submitted by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomProposal {
    pub user_id: Ulid,
    pub floor_id: Ulid,
    pub capacity: u32,
    pub availability: bool,
    pub as_of: Ms,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub floor_id: Ulid,
    pub capacity: u32,
    pub availability: bool,
    pub last_booked_at: Option<Ms>,
    /// Booking currently holding the room, if any.
    pub active_booking: Option<Ulid>,
    /// Max `as_of` over every ledger entry. `None` until the first attempt.
    pub baseline: Option<Ms>,
    /// Append-only, in submission order.
    pub ledger: Vec<VersionEntry>,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(id: Ulid, floor_id: Ulid, capacity: u32) -> Self {
        Self {
            id,
            floor_id,
            capacity,
            availability: true,
            last_booked_at: None,
            active_booking: None,
            baseline: None,
            ledger: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Baseline a new proposal must be strictly newer than.
    pub fn authoritative_as_of(&self) -> Ms {
        self.baseline.unwrap_or(LEDGER_EPOCH_MS)
    }

    /// Append a ledger entry, applying it to the room when accepted.
    pub fn record_version(&mut self, entry: VersionEntry) {
        self.baseline = Some(self.baseline.map_or(entry.as_of, |b| b.max(entry.as_of)));
        if entry.accepted {
            self.floor_id = entry.floor_id;
            self.capacity = entry.capacity;
            if entry.availability && !self.availability {
                self.active_booking = None;
            }
            self.availability = entry.availability;
        }
        self.ledger.push(entry);
    }

    pub fn record_booking(&mut self, booking: Booking) {
        self.availability = false;
        self.last_booked_at = Some(booking.booked_at);
        self.active_booking = Some(booking.id);
        self.bookings.push(booking);
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            floor_id: self.floor_id,
            capacity: self.capacity,
            availability: self.availability,
            last_booked_at: self.last_booked_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FloorState {
    pub id: Ulid,
    pub name: String,
    /// Room count declared at creation; rooms may later move floors.
    pub declared_rooms: u32,
    pub created_at: Ms,
    /// Position in commit order, assigned when the creation event is applied.
    pub seq: u64,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        name: String,
        email: String,
        is_admin: bool,
    },
    /// A floor together with every room provisioned for it.
    FloorCreated {
        id: Ulid,
        name: String,
        room_ids: Vec<Ulid>,
        capacity: u32,
        created_at: Ms,
    },
    VersionRecorded {
        entry: VersionEntry,
    },
    RoomBooked {
        booking: Booking,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorInfo {
    pub id: Ulid,
    pub name: String,
    pub rooms: u32,
    pub created_at: Ms,
}

impl From<&FloorState> for FloorInfo {
    fn from(fs: &FloorState) -> Self {
        Self {
            id: fs.id,
            name: fs.name.clone(),
            rooms: fs.declared_rooms,
            created_at: fs.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub floor_id: Ulid,
    pub capacity: u32,
    pub availability: bool,
    pub last_booked_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedFloor {
    pub floor: FloorInfo,
    pub rooms: Vec<RoomInfo>,
}

/// Result of resolving a proposal against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied {
        room: RoomInfo,
        entry: VersionEntry,
    },
    /// The proposal was stale; only the ledger recorded it.
    Rejected {
        authoritative_as_of: Ms,
        entry: VersionEntry,
    },
}

impl UpdateOutcome {
    pub fn entry(&self) -> &VersionEntry {
        match self {
            UpdateOutcome::Applied { entry, .. } | UpdateOutcome::Rejected { entry, .. } => entry,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booked {
    pub booking: Booking,
    pub room: RoomInfo,
}
