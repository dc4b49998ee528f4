//! Pipeline stages run by the worker for one item.
//!
//! Every stage takes `Arc<Pipeline>` and owned inputs so the returned
//! future borrows nothing from the worker, which keeps serving commands
//! while it is in flight.

use std::sync::Arc;
use std::time::Duration;

use photolift_media::{
    AssetRetriever, AssetTransformer, RawAsset, RetrieveError, TransformError, TransformedAsset,
};
use photolift_protocol::UploadMetadata;
use photolift_uploader::{ChunkProgress, ChunkedUploader, UploadError, UploadReceipt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collab::CollectionStore;
use crate::config::UploadConfig;
use crate::item::UploadItem;

/// Progress reported by a running stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum StageProgress {
    Retrieval(f64),
    Upload(ChunkProgress),
}

/// Why attaching to the collection did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttachError {
    Cancelled,
    Failed(String),
}

pub(crate) struct Pipeline {
    pub(crate) retriever: Arc<AssetRetriever>,
    pub(crate) transformer: Arc<AssetTransformer>,
    pub(crate) uploader: Arc<ChunkedUploader>,
    pub(crate) collections: Arc<dyn CollectionStore>,
    pub(crate) config: UploadConfig,
}

impl Pipeline {
    pub(crate) async fn retrieve(
        self: Arc<Self>,
        item: UploadItem,
        progress: mpsc::UnboundedSender<StageProgress>,
        cancel: CancellationToken,
    ) -> Result<RawAsset, RetrieveError> {
        let mut report = |fraction: f64| {
            let _ = progress.send(StageProgress::Retrieval(fraction));
        };
        self.retriever
            .retrieve(
                &item.source_ref,
                item.kind,
                &item.transform_options,
                &mut report,
                &cancel,
            )
            .await
    }

    /// Runs the transformer on the blocking pool.
    pub(crate) async fn transform(
        self: Arc<Self>,
        item: UploadItem,
        raw: RawAsset,
    ) -> Result<TransformedAsset, TransformError> {
        let transformer = self.transformer.clone();
        let allow_list = self.config.allowed_mime_types.clone();
        tokio::task::spawn_blocking(move || {
            transformer.transform(raw, &item.transform_options, &allow_list)
        })
        .await
        .map_err(|e| TransformError::CannotEncode(format!("transform task failed: {e}")))?
    }

    pub(crate) async fn upload(
        self: Arc<Self>,
        asset: TransformedAsset,
        metadata: UploadMetadata,
        progress: mpsc::UnboundedSender<StageProgress>,
        cancel: CancellationToken,
    ) -> Result<UploadReceipt, UploadError> {
        let mut metadata = metadata;
        metadata.file_name = asset.file_name.clone();

        let mut report = |p: ChunkProgress| {
            let _ = progress.send(StageProgress::Upload(p));
        };
        self.uploader
            .upload(
                asset.payload.clone(),
                &asset.mime_type,
                &metadata,
                self.config.chunk_size_bytes,
                &mut report,
                &cancel,
            )
            .await
    }

    /// Deletes the uploaded source from the asset store.
    pub(crate) async fn delete_source(
        self: Arc<Self>,
        source_ref: String,
    ) -> Result<(), RetrieveError> {
        self.retriever.delete_source(&source_ref).await
    }

    /// Attaches `remote_id` to its collection, retrying up to `finalize_attempts` times.
    pub(crate) async fn attach(
        self: Arc<Self>,
        remote_id: i64,
        collection_id: i64,
        cancel: CancellationToken,
    ) -> Result<(), AttachError> {
        let attempts = self.config.finalize_attempts.max(1);
        let delay = Duration::from_millis(self.config.finalize_retry_delay_ms);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AttachError::Cancelled),
                r = self.collections.attach(remote_id, collection_id) => r,
            };
            match result {
                Ok(()) => {
                    debug!(remote_id, collection_id, attempt, "attached to collection");
                    return Ok(());
                }
                Err(e) => {
                    warn!(remote_id, collection_id, attempt, error = %e, "attach failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AttachError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        Err(AttachError::Failed(last_error))
    }
}
