//! Queue persistence.
//!
//! The worker saves the whole queue after every mutation other than a chunk
//! position change. On startup the
//! saved queue is loaded and [`PersistedQueue::recover`] turns items caught
//! mid-pipeline into something the worker can act on.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::QueueError;
use crate::item::{FailureReason, FailureStage, ItemId, ItemState, UploadItem};

/// An upload waiting to be submitted for moderation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationEntry {
    pub id: ItemId,
    pub remote_id: i64,
    pub collection_id: i64,
}

/// Snapshot written to the [`QueueStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedQueue {
    #[serde(default)]
    pub items: Vec<UploadItem>,
    #[serde(default)]
    pub pending_moderation: Vec<ModerationEntry>,
}

impl PersistedQueue {
    /// Converts items left in an active state by a previous process.
    ///
    /// Items holding a `remote_id` already reached the server and resume at
    /// finalization. Everything else becomes `Failed{Interrupted}`.
    /// Terminal items are dropped.
    pub fn recover(&mut self) {
        self.items.retain(|item| !item.state.is_terminal());
        for item in self.items.iter_mut().filter(|i| i.state.is_active()) {
            if item.remote_id.is_some() {
                item.state = ItemState::Finalizing;
                continue;
            }
            let stage = match item.state {
                ItemState::RetrievingAsset => FailureStage::Retrieval,
                ItemState::Transforming => FailureStage::Transform,
                ItemState::Finalizing => FailureStage::Finalize,
                _ => FailureStage::Upload,
            };
            info!(id = %item.id, ?stage, "recovered interrupted item");
            item.state = ItemState::Failed {
                reason: FailureReason::interrupted(stage),
            };
        }
    }
}

/// Where the queue is saved between runs.
pub trait QueueStore: Send + Sync {
    fn load(&self) -> Result<PersistedQueue, QueueError>;
    fn save(&self, queue: &PersistedQueue) -> Result<(), QueueError>;
}

/// Stores the queue as a JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueStore for JsonFileStore {
    fn load(&self) -> Result<PersistedQueue, QueueError> {
        if !self.path.exists() {
            return Ok(PersistedQueue::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let queue: PersistedQueue = serde_json::from_str(&data)?;
        debug!("loaded {} item(s) from {:?}", queue.items.len(), self.path);
        Ok(queue)
    }

    fn save(&self, queue: &PersistedQueue) -> Result<(), QueueError> {
        let json = serde_json::to_string_pretty(queue)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write then rename so a crash never leaves a torn file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("persisted {} item(s) to {:?}", queue.items.len(), self.path);
        Ok(())
    }
}

/// Keeps the queue in memory only.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<PersistedQueue>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store, as if a previous process had saved `queue`.
    pub fn with_queue(queue: PersistedQueue) -> Self {
        Self {
            saved: Mutex::new(queue),
            saves: AtomicUsize::new(0),
        }
    }

    /// Last saved snapshot.
    pub fn snapshot(&self) -> PersistedQueue {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of saves since creation.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl QueueStore for MemoryStore {
    fn load(&self) -> Result<PersistedQueue, QueueError> {
        Ok(self.snapshot())
    }

    fn save(&self, queue: &PersistedQueue) -> Result<(), QueueError> {
        *self
            .saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = queue.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{FailureClass, NewUpload};
    use photolift_media::AssetKind;

    fn item(state: ItemState, remote_id: Option<i64>) -> UploadItem {
        let upload: NewUpload = serde_json::from_value(serde_json::json!({
            "sourceRef": "asset-1",
            "targetCollectionId": 7,
            "kind": "image",
            "metadata": {
                "fileName": "IMG_0001.jpg",
                "creationDate": "2024-03-09T07:05:01",
                "categoryId": 7
            }
        }))
        .unwrap();
        let mut item = UploadItem::from_new(upload);
        item.state = state;
        item.remote_id = remote_id;
        item
    }

    #[test]
    fn recover_interrupts_active_items() {
        let mut queue = PersistedQueue {
            items: vec![
                item(ItemState::Queued, None),
                item(
                    ItemState::Uploading {
                        chunk_index: 2,
                        total_chunks: 4,
                    },
                    None,
                ),
                item(ItemState::RetrievingAsset, None),
                item(ItemState::Completed, Some(3)),
            ],
            pending_moderation: vec![],
        };
        queue.recover();

        assert_eq!(queue.items.len(), 3);
        assert_eq!(queue.items[0].state, ItemState::Queued);
        let reason = queue.items[1].state.failure().unwrap();
        assert_eq!(reason.class, FailureClass::Interrupted);
        assert_eq!(reason.stage, FailureStage::Upload);
        let reason = queue.items[2].state.failure().unwrap();
        assert_eq!(reason.stage, FailureStage::Retrieval);
    }

    #[test]
    fn recover_resumes_finished_transfers_at_finalizing() {
        let mut queue = PersistedQueue {
            items: vec![
                item(ItemState::Finalizing, Some(42)),
                item(
                    ItemState::Uploading {
                        chunk_index: 3,
                        total_chunks: 4,
                    },
                    Some(43),
                ),
            ],
            pending_moderation: vec![],
        };
        queue.recover();
        assert!(queue.items.iter().all(|i| i.state == ItemState::Finalizing));
        assert_eq!(queue.items[1].kind, AssetKind::Image);
    }

    #[test]
    fn json_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path().join("state").join("queue.json"));
        assert_eq!(store.load().unwrap(), PersistedQueue::default());

        let queue = PersistedQueue {
            items: vec![item(ItemState::Queued, None)],
            pending_moderation: vec![ModerationEntry {
                id: ItemId::new(),
                remote_id: 5,
                collection_id: 7,
            }],
        };
        store.save(&queue).unwrap();
        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
        assert_eq!(store.load().unwrap(), queue);
    }

    #[test]
    fn json_store_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("queue.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonFileStore::new(path).load().unwrap_err();
        assert!(matches!(err, QueueError::Json(_)));
    }

    #[test]
    fn memory_store_keeps_last_save() {
        let store = MemoryStore::new();
        let queue = PersistedQueue {
            items: vec![item(ItemState::Queued, None)],
            pending_moderation: vec![],
        };
        store.save(&queue).unwrap();
        assert_eq!(store.load().unwrap(), queue);
    }
}
