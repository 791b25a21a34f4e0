use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{now_ms, Engine, EngineError};

impl Engine {
    /// Create a floor and provision `room_count` rooms on it, all available
    /// with the default capacity. One WAL event covers the floor and every
    /// room, so either all of them exist or none do.
    pub async fn create_floor(&self, name: String, room_count: u32) -> Result<ProvisionedFloor, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("floor name: must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("floor name too long"));
        }
        if room_count > MAX_ROOMS_PER_FLOOR {
            return Err(EngineError::LimitExceeded("too many rooms on floor"));
        }

        let held = self.lock_catalog().await;
        if self.tables.floors.len() >= MAX_FLOORS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many floors"));
        }
        if self.tables.rooms.len() + room_count as usize > MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let id = Ulid::new();
        let room_ids: Vec<Ulid> = (0..room_count).map(|_| Ulid::new()).collect();
        let created_at = now_ms();
        let event = Event::FloorCreated {
            id,
            name: name.clone(),
            room_ids: room_ids.clone(),
            capacity: DEFAULT_ROOM_CAPACITY,
            created_at,
        };
        self.commit_catalog(held, event).await.map_err(|e| match e {
            EngineError::WalError(msg) => EngineError::ProvisioningFailed(msg),
            other => other,
        })?;

        metrics::counter!(crate::observability::FLOORS_PROVISIONED_TOTAL).increment(1);
        metrics::counter!(crate::observability::ROOMS_PROVISIONED_TOTAL).increment(room_count as u64);
        info!(floor_id = %id, %name, rooms = room_count, "floor provisioned");

        Ok(ProvisionedFloor {
            floor: FloorInfo {
                id,
                name,
                rooms: room_count,
                created_at,
            },
            rooms: room_ids
                .into_iter()
                .map(|rid| RoomInfo {
                    id: rid,
                    floor_id: id,
                    capacity: DEFAULT_ROOM_CAPACITY,
                    availability: true,
                    last_booked_at: None,
                })
                .collect(),
        })
    }

    /// Register a user. E-mail addresses are unique per tenant, compared
    /// case-insensitively.
    pub async fn register_user(&self, name: String, email: String, is_admin: bool) -> Result<UserInfo, EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("user name too long"));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if !email.contains('@') {
            return Err(EngineError::Invalid("email"));
        }

        let held = self.lock_catalog().await;
        if self.tables.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if self.tables.user_emails.contains_key(&email.to_lowercase()) {
            return Err(EngineError::AlreadyExists(format!("user with email {email}")));
        }

        let id = Ulid::new();
        let event = Event::UserRegistered {
            id,
            name: name.clone(),
            email: email.clone(),
            is_admin,
        };
        self.commit_catalog(held, event).await?;

        info!(user_id = %id, "user registered");
        Ok(UserInfo {
            id,
            name,
            email,
            is_admin,
        })
    }
}
