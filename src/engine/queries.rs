use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedRoomState};

impl Engine {
    pub fn get_user(&self, id: Ulid) -> Result<UserInfo, EngineError> {
        self.tables
            .users
            .get(&id)
            .map(|u| u.value().clone())
            .ok_or(EngineError::user_not_found(id))
    }

    /// All floors in creation order.
    pub fn list_floors(&self) -> Vec<FloorInfo> {
        let mut floors: Vec<(u64, FloorInfo)> = self
            .tables
            .floors
            .iter()
            .map(|e| (e.value().seq, FloorInfo::from(e.value())))
            .collect();
        floors.sort_by_key(|(seq, _)| *seq);
        floors.into_iter().map(|(_, f)| f).collect()
    }

    pub fn get_floor(&self, id: Ulid) -> Result<FloorInfo, EngineError> {
        self.tables
            .floors
            .get(&id)
            .map(|f| FloorInfo::from(f.value()))
            .ok_or(EngineError::floor_not_found(id))
    }

    /// Floor names are not unique; the earliest floor with the name wins.
    pub fn floor_by_name(&self, name: &str) -> Option<FloorInfo> {
        self.tables
            .floors
            .iter()
            .filter(|e| e.value().name == name)
            .min_by_key(|e| e.value().seq)
            .map(|e| FloorInfo::from(e.value()))
    }

    pub async fn get_room(&self, id: Ulid) -> Result<RoomInfo, EngineError> {
        let rs = self
            .get_room_state(&id)
            .ok_or(EngineError::room_not_found(id))?;
        let guard = rs.read().await;
        Ok(guard.info())
    }

    /// Rooms on a floor, or every room on a visible floor when `floor_id` is
    /// `None`. Ordered by floor, then room id.
    pub async fn list_rooms(&self, floor_id: Option<Ulid>) -> Vec<RoomInfo> {
        let ids: Vec<Ulid> = match floor_id {
            Some(fid) => self
                .tables
                .floor_rooms
                .get(&fid)
                .map(|e| e.value().clone())
                .unwrap_or_default(),
            None => self.tables.rooms.iter().map(|e| *e.key()).collect(),
        };
        let states: Vec<SharedRoomState> = ids.iter().filter_map(|id| self.get_room_state(id)).collect();

        let mut rooms = Vec::with_capacity(states.len());
        for rs in states {
            let info = rs.read().await.info();
            if floor_id.is_some_and(|fid| fid != info.floor_id) {
                continue; // moved while we were collecting
            }
            if self.tables.floors.contains_key(&info.floor_id) {
                rooms.push(info);
            }
        }
        rooms.sort_by_key(|r| (r.floor_id, r.id));
        rooms
    }

    /// Every update attempt on a room, in submission order.
    pub async fn versions(&self, room_id: Ulid) -> Result<Vec<VersionEntry>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::room_not_found(room_id))?;
        let guard = rs.read().await;
        Ok(guard.ledger.clone())
    }

    /// The as-of a new proposal for this room must be strictly newer than.
    pub async fn baseline(&self, room_id: Ulid) -> Result<Ms, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::room_not_found(room_id))?;
        let guard = rs.read().await;
        Ok(guard.authoritative_as_of())
    }

    pub async fn room_bookings(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::room_not_found(room_id))?;
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }

    /// Bookings made by a user across all rooms, oldest first.
    pub async fn user_bookings(&self, user_id: Ulid) -> Vec<Booking> {
        let states: Vec<SharedRoomState> = self.tables.rooms.iter().map(|e| e.value().clone()).collect();
        let mut bookings = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            bookings.extend(guard.bookings.iter().filter(|b| b.user_id == user_id).cloned());
        }
        bookings.sort_by_key(|b| (b.booked_at, b.id));
        bookings
    }
}
