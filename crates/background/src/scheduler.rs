//! OS background task scheduling seam.

use chrono::{DateTime, Utc};

/// Request for a future background window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub identifier: String,
    pub earliest_begin: DateTime<Utc>,
    pub requires_network: bool,
    pub requires_external_power: bool,
}

/// Errors reported by the platform scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("background scheduling unavailable")]
    Unavailable,

    #[error("too many pending background requests")]
    TooManyPending,

    #[error("scheduler rejected request: {0}")]
    Rejected(String),
}

/// Submits background task requests to the platform.
pub trait BackgroundScheduler: Send + Sync {
    fn submit(&self, request: ScheduleRequest) -> Result<(), ScheduleError>;
}
