//! Queue items and their state machine.

use std::fmt;

use photolift_media::{AssetKind, RetrieveError, TransformError, TransformOptions};
use photolift_protocol::UploadMetadata;
use photolift_uploader::UploadError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a queue item, kept across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureClass {
    /// Network, timeouts, source temporarily unavailable. Retryable.
    Transient,
    /// Session expired; triggers a re-login.
    Authorization,
    /// The server will never accept this asset.
    FormatRejected,
    /// The server refused the request; message is shown verbatim.
    ServerRejected,
    /// Cut short by the end of a background window; restarts next window.
    Interrupted,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureClass::FormatRejected)
    }
}

/// Pipeline stage where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureStage {
    Retrieval,
    Transform,
    Upload,
    Finalize,
}

/// Why an item failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    pub class: FailureClass,
    pub stage: FailureStage,
    pub message: String,
}

impl FailureReason {
    pub fn new(class: FailureClass, stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            class,
            stage,
            message: message.into(),
        }
    }

    pub fn interrupted(stage: FailureStage) -> Self {
        Self::new(
            FailureClass::Interrupted,
            stage,
            "interrupted before completion",
        )
    }

    pub fn from_retrieve(e: &RetrieveError) -> Self {
        let class = match e {
            RetrieveError::SourceUnavailable(_) | RetrieveError::ExportFailed(_) => {
                FailureClass::Transient
            }
            RetrieveError::UnsupportedFormat => FailureClass::FormatRejected,
            RetrieveError::Unauthorized => FailureClass::Authorization,
            RetrieveError::Cancelled => FailureClass::Interrupted,
        };
        Self::new(class, FailureStage::Retrieval, e.to_string())
    }

    pub fn from_transform(e: &TransformError) -> Self {
        let class = match e {
            TransformError::CannotDecode(_) | TransformError::CannotEncode(_) => {
                FailureClass::Transient
            }
            TransformError::FormatRejectedByServer(_) | TransformError::EncoderUnavailable => {
                FailureClass::FormatRejected
            }
        };
        Self::new(class, FailureStage::Transform, e.to_string())
    }

    pub fn from_upload(e: &UploadError) -> Self {
        let class = match e {
            UploadError::Network(_) => FailureClass::Transient,
            UploadError::ServerRejected(_)
            | UploadError::MalformedResponse(_)
            | UploadError::InvalidConfiguration(_) => FailureClass::ServerRejected,
            UploadError::Unauthorized => FailureClass::Authorization,
            UploadError::PayloadRejected(_) => FailureClass::FormatRejected,
            UploadError::Cancelled => FailureClass::Interrupted,
        };
        Self::new(class, FailureStage::Upload, e.to_string())
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} failure during {:?}: {}", self.class, self.stage, self.message)
    }
}

/// Lifecycle state of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ItemState {
    Queued,
    RetrievingAsset,
    Transforming,
    #[serde(rename_all = "camelCase")]
    Uploading {
        chunk_index: usize,
        total_chunks: usize,
    },
    Finalizing,
    Completed,
    Failed {
        reason: FailureReason,
    },
    Cancelled,
}

impl ItemState {
    /// True while the worker is processing the item.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ItemState::RetrievingAsset
                | ItemState::Transforming
                | ItemState::Uploading { .. }
                | ItemState::Finalizing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Cancelled)
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            ItemState::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// What a caller submits to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUpload {
    pub source_ref: String,
    pub target_collection_id: i64,
    pub kind: AssetKind,
    #[serde(default)]
    pub transform_options: TransformOptions,
    pub metadata: UploadMetadata,
    /// Remove the source from the asset store once the upload completed.
    #[serde(default)]
    pub delete_after_upload: bool,
}

/// One pending transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    pub id: ItemId,
    pub source_ref: String,
    pub target_collection_id: i64,
    pub kind: AssetKind,
    pub transform_options: TransformOptions,
    pub metadata: UploadMetadata,
    #[serde(default)]
    pub delete_after_upload: bool,
    pub state: ItemState,
    /// Set once the bytes reached the server.
    #[serde(default)]
    pub remote_id: Option<i64>,
    #[serde(default)]
    pub attempts: u32,
}

impl UploadItem {
    pub fn from_new(upload: NewUpload) -> Self {
        Self {
            id: ItemId::new(),
            source_ref: upload.source_ref,
            target_collection_id: upload.target_collection_id,
            kind: upload.kind,
            transform_options: upload.transform_options,
            metadata: upload.metadata,
            delete_after_upload: upload.delete_after_upload,
            state: ItemState::Queued,
            remote_id: None,
            attempts: 0,
        }
    }

    /// True if a `Retry` decision may restart this item.
    pub fn is_retryable(&self) -> bool {
        self.kind != AssetKind::Unsupported
            && self
                .state
                .failure()
                .is_none_or(|reason| reason.class.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            FailureReason::from_retrieve(&RetrieveError::UnsupportedFormat).class,
            FailureClass::FormatRejected
        );
        assert_eq!(
            FailureReason::from_retrieve(&RetrieveError::Unauthorized).class,
            FailureClass::Authorization
        );
        assert_eq!(
            FailureReason::from_transform(&TransformError::CannotDecode("x".into())).class,
            FailureClass::Transient
        );
        assert_eq!(
            FailureReason::from_transform(&TransformError::EncoderUnavailable).class,
            FailureClass::FormatRejected
        );
        let reason = FailureReason::from_upload(&UploadError::ServerRejected("Disk full".into()));
        assert_eq!(reason.class, FailureClass::ServerRejected);
        assert_eq!(reason.message, "Disk full");
        assert_eq!(
            FailureReason::from_upload(&UploadError::PayloadRejected("413".into())).class,
            FailureClass::FormatRejected
        );
    }

    #[test]
    fn only_format_rejection_is_final() {
        assert!(FailureClass::Transient.is_retryable());
        assert!(FailureClass::ServerRejected.is_retryable());
        assert!(FailureClass::Authorization.is_retryable());
        assert!(!FailureClass::FormatRejected.is_retryable());
    }

    #[test]
    fn state_json_shape() {
        let state = ItemState::Uploading {
            chunk_index: 1,
            total_chunks: 4,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": "uploading", "chunkIndex": 1, "totalChunks": 4})
        );
        let failed = ItemState::Failed {
            reason: FailureReason::interrupted(FailureStage::Upload),
        };
        let back: ItemState =
            serde_json::from_value(serde_json::to_value(&failed).unwrap()).unwrap();
        assert_eq!(back, failed);
        assert!(!failed.is_active());
        assert!(state.is_active());
    }
}
