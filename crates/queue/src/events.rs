//! Events emitted by the queue worker.

use serde::{Deserialize, Serialize};

use crate::item::{FailureReason, ItemId, ItemState};

/// How an item left the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ItemOutcome {
    #[serde(rename_all = "camelCase")]
    Completed { remote_id: i64 },
    Cancelled,
    /// Removed after a failure (skip or dismiss).
    Abandoned { reason: FailureReason },
}

/// Why the worker stopped taking new items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PauseReason {
    /// Requested by the caller.
    Requested,
    /// Too many deferred failures in the queue.
    FailureBudget,
    /// The background window ended.
    Suspended,
}

/// Events emitted to observers, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueueEvent {
    StateChanged {
        id: ItemId,
        state: ItemState,
    },
    /// Upload progress of the active item, non-decreasing.
    Progress {
        id: ItemId,
        fraction: f64,
    },
    RetrievalProgress {
        id: ItemId,
        fraction: f64,
    },
    Remaining {
        count: usize,
    },
    ItemFinished {
        id: ItemId,
        outcome: ItemOutcome,
    },
    /// The bytes are on the server but attaching them to the collection failed.
    #[serde(rename_all = "camelCase")]
    FinalizeFailed {
        id: ItemId,
        remote_id: i64,
        message: String,
    },
    /// No byte signature matched; `image/jpeg` was assumed.
    MimeFallback {
        id: ItemId,
    },
    #[serde(rename_all = "camelCase")]
    ModerationPending {
        id: ItemId,
        remote_id: i64,
    },
    Paused {
        reason: PauseReason,
    },
    /// Nothing runnable is left.
    Idle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_is_tagged() {
        let event = QueueEvent::Remaining { count: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"type": "remaining", "count": 3}));

        let event = QueueEvent::Paused {
            reason: PauseReason::FailureBudget,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"failureBudget\""));
    }
}
