//! Batch progress derived from the queue.

use serde::Serialize;

use crate::item::UploadItem;

/// Snapshot of the queue with batch counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatch {
    pub items: Vec<UploadItem>,
    pub total_in_batch: usize,
    pub completed_in_batch: usize,
    pub remaining: usize,
}

/// Counters behind [`UploadBatch`], owned by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BatchCounters {
    total: usize,
    completed: usize,
}

impl BatchCounters {
    pub(crate) fn added(&mut self, count: usize) {
        self.total += count;
    }

    /// An item left the queue for good.
    pub(crate) fn finished(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
    }

    /// Resets once nothing is left.
    pub(crate) fn settle(&mut self, queue_len: usize) {
        if queue_len == 0 {
            *self = Self::default();
        }
    }

    pub(crate) fn snapshot(&self, items: &[UploadItem]) -> UploadBatch {
        UploadBatch {
            items: items.to_vec(),
            total_in_batch: self.total,
            completed_in_batch: self.completed,
            remaining: items.len(),
        }
    }
}
