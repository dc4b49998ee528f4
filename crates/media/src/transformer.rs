//! Rewrites retrieved assets into uploadable payloads.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::asset::{AssetKind, RawAsset, TransformOptions, TransformedAsset};
use crate::codec::MediaCodec;
use crate::error::TransformError;
use crate::jpeg::estimate_quality;
use crate::sniff::{self, JPEG, Signature, is_allowed};

/// Quality used when an image is converted only because its format is refused.
const COERCION_QUALITY: f32 = 0.9;

/// Applies metadata stripping, recompression and format coercion.
pub struct AssetTransformer {
    codec: Arc<dyn MediaCodec>,
}

impl AssetTransformer {
    pub fn new(codec: Arc<dyn MediaCodec>) -> Self {
        Self { codec }
    }

    /// Transforms `raw` for upload.
    ///
    /// An empty `allow_list` accepts every format. Running `transform` on
    /// its own output with the same options returns the same bytes.
    pub fn transform(
        &self,
        raw: RawAsset,
        options: &TransformOptions,
        allow_list: &[String],
    ) -> Result<TransformedAsset, TransformError> {
        let accepts = |mime: &str| allow_list.is_empty() || is_allowed(mime, allow_list);

        let payload = match raw.kind {
            AssetKind::Unsupported => {
                let mime = raw
                    .source_mime
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".into());
                return Err(TransformError::FormatRejectedByServer(mime));
            }
            AssetKind::Video => {
                let mime = sniff::sniff(&raw.payload)
                    .map(|s| s.mime.to_string())
                    .or_else(|| raw.source_mime.clone());
                if let Some(mime) = mime
                    && !accepts(&mime)
                {
                    return Err(TransformError::FormatRejectedByServer(mime));
                }
                raw.payload.clone()
            }
            AssetKind::Image => self.transform_image(&raw, options, &accepts)?,
        };

        let (signature, mime_fallback) = match sniff::sniff(&payload) {
            Some(signature) => (signature, false),
            None => {
                warn!(
                    file = %raw.file_name,
                    "no byte signature matched, assuming image/jpeg"
                );
                (JPEG, true)
            }
        };
        if !mime_fallback && !accepts(signature.mime) {
            return Err(TransformError::FormatRejectedByServer(
                signature.mime.to_string(),
            ));
        }

        Ok(TransformedAsset {
            payload,
            mime_type: signature.mime.to_string(),
            file_name: rename(&raw.file_name, signature),
            extension: signature.extension.to_string(),
            mime_fallback,
        })
    }

    fn transform_image(
        &self,
        raw: &RawAsset,
        options: &TransformOptions,
        accepts: &dyn Fn(&str) -> bool,
    ) -> Result<Bytes, TransformError> {
        let source = sniff::sniff(&raw.payload);
        let source_mime = source
            .map(|s| s.mime.to_string())
            .or_else(|| raw.source_mime.clone());

        let mut metadata = self.codec.read_metadata(&raw.payload)?;
        let stripped = options.strip_private_metadata && metadata.strip_private();

        let recompress = options.recompress_quality.map(|q| q.clamp(1, 100)).filter(|&q| {
            let current = (source == Some(JPEG))
                .then(|| estimate_quality(&raw.payload))
                .flatten();
            match current {
                Some(current) if current <= q => {
                    debug!(current, requested = q, "already at or below requested quality");
                    false
                }
                _ => true,
            }
        });
        let coerce = source_mime.as_deref().is_some_and(|mime| !accepts(mime));

        if let Some(quality) = recompress {
            info!(file = %raw.file_name, quality, "recompressing image");
            return self
                .codec
                .encode_jpeg(&raw.payload, f32::from(quality) / 100.0, &metadata);
        }

        if coerce {
            let mime = source_mime.unwrap_or_default();
            if !accepts(JPEG.mime) {
                return Err(TransformError::FormatRejectedByServer(mime));
            }
            info!(file = %raw.file_name, from = %mime, "converting image to JPEG");
            return self
                .codec
                .encode_jpeg(&raw.payload, COERCION_QUALITY, &metadata);
        }

        if stripped {
            debug!(file = %raw.file_name, "rewriting stripped metadata");
            return self.codec.write_metadata(&raw.payload, &metadata);
        }

        Ok(raw.payload.clone())
    }
}

/// Replaces the extension of `file_name` with the signature's.
fn rename(file_name: &str, signature: Signature) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("upload");
    format!("{stem}.{}", signature.extension)
}
