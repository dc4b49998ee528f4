//! Asset store over plain files. A source reference is a file path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Local, NaiveDateTime};
use photolift_media::{
    AssetDescriptor, AssetKind, AssetStore, ExportPreset, ExportedVideo, ImageRequest,
    ProgressSink, RetrieveError, sniff,
};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Bytes read to sniff the stored format.
const HEAD_LEN: usize = 64;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "heic", "heif", "webp", "bmp", "tif", "tiff",
];

const VIDEO_EXTENSIONS: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("mov", "video/quicktime"),
];

/// Resolves the asset kind from the file extension.
pub fn kind_of(path: &Path) -> AssetKind {
    let ext = extension(path);
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        AssetKind::Image
    } else if VIDEO_EXTENSIONS.iter().any(|(e, _)| *e == ext) {
        AssetKind::Video
    } else {
        AssetKind::Unsupported
    }
}

/// Last modification time of `path` in local time.
pub fn modified_at(path: &Path) -> Option<NaiveDateTime> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified).naive_local())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Serves assets straight from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsAssetStore;

impl FsAssetStore {
    async fn read_head(path: &Path) -> Result<Vec<u8>, RetrieveError> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut head = vec![0u8; HEAD_LEN];
        let mut filled = 0;
        while filled < HEAD_LEN {
            let n = file.read(&mut head[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        head.truncate(filled);
        Ok(head)
    }
}

impl AssetStore for FsAssetStore {
    fn describe(
        &self,
        source_ref: &str,
    ) -> Pin<Box<dyn Future<Output = Result<AssetDescriptor, RetrieveError>> + Send + '_>> {
        let path = PathBuf::from(source_ref);
        Box::pin(async move {
            let head = Self::read_head(&path).await?;
            let kind = kind_of(&path);
            let mime_type = sniff(&head).map(|s| s.mime.to_string()).or_else(|| {
                let ext = extension(&path);
                VIDEO_EXTENSIONS
                    .iter()
                    .find(|(e, _)| *e == ext)
                    .map(|(_, mime)| mime.to_string())
            });
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".into());
            debug!(path = %path.display(), ?kind, ?mime_type, "described file");

            Ok(AssetDescriptor {
                kind,
                file_name,
                pixel_width: 0,
                pixel_height: 0,
                mime_type,
                creation_date: modified_at(&path),
                export_presets: match kind {
                    AssetKind::Video => vec![ExportPreset::Passthrough],
                    _ => vec![],
                },
            })
        })
    }

    fn fetch_image(
        &self,
        source_ref: &str,
        _request: ImageRequest,
        progress: ProgressSink,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, RetrieveError>> + Send + '_>> {
        let path = PathBuf::from(source_ref);
        Box::pin(async move {
            let data = tokio::fs::read(&path).await?;
            progress.report(1.0);
            Ok(Bytes::from(data))
        })
    }

    fn export_video(
        &self,
        source_ref: &str,
        preset: ExportPreset,
        progress: ProgressSink,
    ) -> Pin<Box<dyn Future<Output = Result<ExportedVideo, RetrieveError>> + Send + '_>> {
        let path = PathBuf::from(source_ref);
        Box::pin(async move {
            if preset != ExportPreset::Passthrough {
                return Err(RetrieveError::ExportFailed(format!(
                    "{preset:?} needs a transcoder"
                )));
            }
            if !tokio::fs::try_exists(&path).await? {
                return Err(RetrieveError::SourceUnavailable(format!(
                    "{} not found",
                    path.display()
                )));
            }
            progress.report(1.0);
            let ext = extension(&path);
            let mime_type = VIDEO_EXTENSIONS
                .iter()
                .find(|(e, _)| *e == ext)
                .map(|(_, mime)| mime.to_string());
            Ok(ExportedVideo {
                path,
                mime_type,
                temporary: false,
            })
        })
    }

    fn delete(
        &self,
        source_ref: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), RetrieveError>> + Send + '_>> {
        let path = PathBuf::from(source_ref);
        Box::pin(async move {
            tokio::fs::remove_file(&path).await?;
            debug!(path = %path.display(), "deleted uploaded file");
            Ok(())
        })
    }
}
