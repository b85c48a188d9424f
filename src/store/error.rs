use ulid::Ulid;

use crate::model::Version;

#[derive(Debug)]
pub enum StoreError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The vehicle changed since the caller read it. The only error that maps to
    /// a business-level conflict; everything else is an infrastructure failure.
    VersionMismatch {
        vehicle_id: Ulid,
        expected: Version,
        actual: Version,
    },
    VehicleMismatch {
        reservation_id: Ulid,
        vehicle_id: Ulid,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl StoreError {
    pub fn is_version_mismatch(&self) -> bool {
        matches!(self, StoreError::VersionMismatch { .. })
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::VersionMismatch {
                vehicle_id,
                expected,
                actual,
            } => write!(
                f,
                "version mismatch on vehicle {vehicle_id}: expected {expected}, found {actual}"
            ),
            StoreError::VehicleMismatch {
                reservation_id,
                vehicle_id,
            } => write!(
                f,
                "reservation {reservation_id} does not belong to vehicle {vehicle_id}"
            ),
            StoreError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
