//! Asset store seam.
//!
//! The composition root implements [`AssetStore`] on top of whatever holds
//! the user's media (a photo library, a directory, a cloud archive).

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::asset::AssetDescriptor;
use crate::error::RetrieveError;
use crate::preset::ExportPreset;

/// Thread-safe progress reporter handed to the store.
///
/// May be called from any thread; values arrive on the retriever's task.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<f64>,
}

impl ProgressSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<f64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Reports a download/export fraction in `0.0..=1.0`.
    pub fn report(&self, fraction: f64) {
        let _ = self.tx.send(fraction);
    }
}

/// Parameters for a still-image fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageRequest {
    /// Longer side of the returned image; `None` means full size.
    pub max_pixels: Option<u32>,
    /// Allow downloading from the remote archive.
    pub network_access: bool,
}

/// A video exported to a file by the store.
#[derive(Debug, Clone)]
pub struct ExportedVideo {
    pub path: PathBuf,
    pub mime_type: Option<String>,
    /// Remove the file once it has been read.
    pub temporary: bool,
}

/// Source of the assets referenced by queue items.
pub trait AssetStore: Send + Sync {
    /// Describes the asset behind `source_ref`.
    fn describe(
        &self,
        source_ref: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AssetDescriptor, RetrieveError>> + Send + '_>>;

    /// Fetches the best-quality representation of a still image.
    ///
    /// Dropping the returned future aborts the fetch.
    fn fetch_image(
        &self,
        source_ref: &str,
        request: ImageRequest,
        progress: ProgressSink,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, RetrieveError>> + Send + '_>>;

    /// Exports a video with the given preset.
    ///
    /// Dropping the returned future aborts the export.
    fn export_video(
        &self,
        source_ref: &str,
        preset: ExportPreset,
        progress: ProgressSink,
    ) -> Pin<Box<dyn Future<Output = Result<ExportedVideo, RetrieveError>> + Send + '_>>;

    /// Removes the asset from the store after a successful upload.
    ///
    /// Stores that cannot delete keep the default, which refuses.
    fn delete(
        &self,
        source_ref: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RetrieveError>> + Send + '_>> {
        let source_ref = source_ref.to_string();
        Box::pin(async move {
            Err(RetrieveError::SourceUnavailable(format!(
                "store cannot delete {source_ref}"
            )))
        })
    }
}
