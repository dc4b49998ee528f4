//! Fetches asset bytes from the store with progress and cancellation.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use photolift_transfer::ProgressGate;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asset::{AssetKind, RawAsset, TransformOptions};
use crate::error::RetrieveError;
use crate::preset::{ExportPreset, negotiate_preset};
use crate::store::{AssetStore, ImageRequest, ProgressSink};

/// Pulls raw bytes for queue items out of an [`AssetStore`].
pub struct AssetRetriever {
    store: Arc<dyn AssetStore>,
    accepted_mimes: Vec<String>,
}

impl AssetRetriever {
    /// `accepted_mimes` is the server's allow list, used to decide whether
    /// a video can be exported without re-encoding. Empty accepts everything.
    pub fn new(store: Arc<dyn AssetStore>, accepted_mimes: Vec<String>) -> Self {
        Self {
            store,
            accepted_mimes,
        }
    }

    /// Retrieves the asset behind `source_ref`.
    ///
    /// `on_progress` sees non-decreasing fractions, in order, on the calling
    /// task. When `cancel` fires the in-flight fetch is dropped and
    /// [`RetrieveError::Cancelled`] is returned.
    pub async fn retrieve(
        &self,
        source_ref: &str,
        kind: AssetKind,
        options: &TransformOptions,
        on_progress: &mut (dyn FnMut(f64) + Send),
        cancel: &CancellationToken,
    ) -> Result<RawAsset, RetrieveError> {
        check_cancelled(cancel)?;

        if kind == AssetKind::Unsupported {
            return Err(RetrieveError::UnsupportedFormat);
        }

        let descriptor = self.store.describe(source_ref).await?;
        check_cancelled(cancel)?;

        let downscale = options.downscale_for(descriptor.long_side());
        let mut gate = ProgressGate::new();
        let (sink, rx) = ProgressSink::channel();

        let (payload, source_mime) = match kind {
            AssetKind::Image => {
                let request = ImageRequest {
                    max_pixels: downscale,
                    network_access: true,
                };
                debug!(source_ref, ?request, "fetching image");
                let fetch = self.store.fetch_image(source_ref, request, sink);
                let payload = drive(fetch, rx, &mut gate, on_progress, cancel).await?;
                (payload, descriptor.mime_type.clone())
            }
            AssetKind::Video => {
                let accepted = descriptor
                    .mime_type
                    .as_deref()
                    .is_some_and(|mime| self.accepts(mime));
                let preset = negotiate_preset(
                    &descriptor.export_presets,
                    descriptor.long_side(),
                    downscale,
                    accepted,
                )?;
                debug!(source_ref, ?preset, "exporting video");
                let export = self.store.export_video(source_ref, preset, sink);
                let exported = drive(export, rx, &mut gate, on_progress, cancel).await?;

                let payload = tokio::fs::read(&exported.path).await?;
                if exported.temporary
                    && let Err(e) = tokio::fs::remove_file(&exported.path).await
                {
                    warn!(
                        path = %exported.path.display(),
                        error = %e,
                        "failed to remove exported video"
                    );
                }
                let mime = if preset == ExportPreset::Passthrough {
                    exported.mime_type.or(descriptor.mime_type.clone())
                } else {
                    exported.mime_type
                };
                (Bytes::from(payload), mime)
            }
            AssetKind::Unsupported => return Err(RetrieveError::UnsupportedFormat),
        };

        check_cancelled(cancel)?;
        if let Some(fraction) = gate.offer(1.0) {
            on_progress(fraction);
        }

        info!(source_ref, bytes = payload.len(), "asset retrieved");

        Ok(RawAsset {
            kind,
            payload,
            file_name: descriptor.file_name,
            source_mime,
            creation_date: descriptor.creation_date,
        })
    }

    /// Removes an uploaded asset from the store.
    pub async fn delete_source(&self, source_ref: &str) -> Result<(), RetrieveError> {
        self.store.delete(source_ref).await?;
        info!(source_ref, "source removed after upload");
        Ok(())
    }

    /// An empty allow list accepts everything.
    fn accepts(&self, mime: &str) -> bool {
        self.accepted_mimes.is_empty()
            || self
                .accepted_mimes
                .iter()
                .any(|m| m.eq_ignore_ascii_case(mime))
    }
}

/// Polls `fetch` to completion while forwarding progress and watching `cancel`.
async fn drive<T>(
    fetch: impl Future<Output = Result<T, RetrieveError>>,
    mut rx: mpsc::UnboundedReceiver<f64>,
    gate: &mut ProgressGate,
    on_progress: &mut (dyn FnMut(f64) + Send),
    cancel: &CancellationToken,
) -> Result<T, RetrieveError> {
    tokio::pin!(fetch);
    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetrieveError::Cancelled),
            Some(fraction) = rx.recv() => {
                check_cancelled(cancel)?;
                if let Some(f) = gate.offer(fraction) {
                    on_progress(f);
                }
            }
            result = &mut fetch => break result,
        }
    };
    while let Ok(fraction) = rx.try_recv() {
        if let Some(f) = gate.offer(fraction) {
            on_progress(f);
        }
    }
    result
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), RetrieveError> {
    if cancel.is_cancelled() {
        Err(RetrieveError::Cancelled)
    } else {
        Ok(())
    }
}
