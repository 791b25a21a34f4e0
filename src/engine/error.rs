use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Proposal was not newer than the ledger baseline.
    #[error("conflict: room {room_id} was updated by another user as of {authoritative_as_of}")]
    Conflict {
        room_id: Ulid,
        authoritative_as_of: Ms,
    },
    #[error("room {0} is not available for booking")]
    Unavailable(Ulid),
    #[error("room {room_id} is on floor {actual}, not {requested}")]
    FloorMismatch {
        room_id: Ulid,
        requested: Ulid,
        actual: Ulid,
    },
    #[error("invalid {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("floor provisioning failed: {0}")]
    ProvisioningFailed(String),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn room_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "room", id }
    }

    pub fn floor_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "floor", id }
    }

    pub fn user_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "user", id }
    }

    /// SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "P0002",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::Conflict { .. } => "40001",
            EngineError::Unavailable(_) => "55006",
            EngineError::FloorMismatch { .. } | EngineError::Invalid(_) => "22023",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::ProvisioningFailed(_) | EngineError::WalError(_) => "58030",
        }
    }
}
