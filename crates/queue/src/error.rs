//! Queue error types.

use crate::item::ItemId;

/// Errors returned by the queue handle and the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("item not found: {0}")]
    NotFound(ItemId),

    #[error("queue worker has stopped")]
    Closed,
}
