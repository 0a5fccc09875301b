use ulid::Ulid;

use crate::model::InvalidRange;

use super::guard::GuardError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),
    #[error("room already booked: conflicts with booking {0}")]
    Conflict(Ulid),
    #[error("room number {number} already used in hotel {hotel_id}")]
    DuplicateRoomNumber { hotel_id: Ulid, number: String },
    #[error("cannot delete hotel {0}: it still has rooms")]
    HasRooms(Ulid),
    #[error("cannot delete room {0}: it has active bookings")]
    HasActiveBookings(Ulid),
    #[error("booking {id} is {status}")]
    InvalidState { id: Ulid, status: &'static str },
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    /// WAL I/O failed. Transient from the caller's point of view.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<GuardError> for EngineError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::InvalidRange(r) => EngineError::InvalidRange(r),
            GuardError::Conflict { booking_id } => EngineError::Conflict(booking_id),
        }
    }
}

impl EngineError {
    /// PostgreSQL SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "P0002",
            EngineError::AlreadyExists(_) | EngineError::DuplicateRoomNumber { .. } => "23505",
            EngineError::InvalidRange(_) => "22007",
            EngineError::Conflict(_) => "23P01",
            EngineError::HasRooms(_) | EngineError::HasActiveBookings(_) => "23503",
            EngineError::InvalidState { .. } => "55000",
            EngineError::InvalidValue(_) => "22023",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::StorageUnavailable(_) => "58030",
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::StorageUnavailable(_))
    }
}
