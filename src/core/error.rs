use crate::core::types::Ride;
use thiserror::Error;

/// Failure reported by a regional store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl StoreError {
    /// Connection-level failures may succeed on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Closed)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure surfaced to callers of the coordinator.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Region '{region}' is unavailable: {reason}")]
    RegionUnavailable { region: String, reason: String },

    #[error("No regions available for {0}")]
    NoRegionsAvailable(String),

    #[error("Store operation failed in region '{region}': {message}")]
    StoreOperationFailed { region: String, message: String },

    #[error(
        "Migration of ride {} from '{from}' to '{to}' failed after the source row was deleted: {message}",
        ride.ride_id
    )]
    MigrationPartialFailure {
        from: String,
        to: String,
        message: String,
        ride: Box<Ride>,
    },

    #[error("Region '{0}' is not configured")]
    UnknownRegion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation '{0}' timed out")]
    Timeout(String),

    #[error("Background task failed: {0}")]
    BackgroundTask(String),
}

impl CoordinatorError {
    /// Maps a store failure into the caller-facing taxonomy.
    pub fn from_store(region: &str, err: StoreError) -> Self {
        if err.is_transient() {
            Self::RegionUnavailable {
                region: region.to_string(),
                reason: err.to_string(),
            }
        } else {
            Self::StoreOperationFailed {
                region: region.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Returns true for failures the retry policy may attempt again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RegionUnavailable { .. } | Self::NoRegionsAvailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
