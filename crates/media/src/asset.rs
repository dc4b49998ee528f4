use bytes::Bytes;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::preset::ExportPreset;

/// Kind of asset, resolved once when the item is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetKind {
    Image,
    Video,
    Unsupported,
}

/// Per-item transformation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOptions {
    /// Cap for the longer side, in pixels.
    #[serde(default)]
    pub resize_max_pixels: Option<u32>,
    /// JPEG quality in `1..=100`.
    #[serde(default)]
    pub recompress_quality: Option<u8>,
    #[serde(default)]
    pub strip_private_metadata: bool,
}

impl TransformOptions {
    /// Requested size cap, if it actually shrinks a source whose longer side is `long_side`.
    pub fn downscale_for(&self, long_side: u32) -> Option<u32> {
        self.resize_max_pixels
            .filter(|&cap| cap > 0 && long_side > 0 && cap < long_side)
    }
}

/// What the asset store knows about an asset before fetching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub kind: AssetKind,
    pub file_name: String,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// MIME type of the stored representation, if known.
    pub mime_type: Option<String>,
    pub creation_date: Option<NaiveDateTime>,
    /// Export presets the store can produce (videos only).
    pub export_presets: Vec<ExportPreset>,
}

impl AssetDescriptor {
    pub fn long_side(&self) -> u32 {
        self.pixel_width.max(self.pixel_height)
    }
}

/// Bytes fetched from the asset store, before transformation.
#[derive(Debug, Clone)]
pub struct RawAsset {
    pub kind: AssetKind,
    pub payload: Bytes,
    pub file_name: String,
    pub source_mime: Option<String>,
    pub creation_date: Option<NaiveDateTime>,
}

/// Final bytes handed to the uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedAsset {
    pub payload: Bytes,
    pub mime_type: String,
    pub file_name: String,
    pub extension: String,
    /// True when no byte signature matched and `image/jpeg` was assumed.
    pub mime_fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downscale_only_when_smaller_than_source() {
        let opts = TransformOptions {
            resize_max_pixels: Some(2048),
            ..Default::default()
        };
        assert_eq!(opts.downscale_for(4032), Some(2048));
        assert_eq!(opts.downscale_for(2048), None);
        assert_eq!(opts.downscale_for(1024), None);
        assert_eq!(TransformOptions::default().downscale_for(4032), None);
    }

    #[test]
    fn options_json_defaults() {
        let opts: TransformOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, TransformOptions::default());
        let kind: AssetKind = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(kind, AssetKind::Video);
    }
}
