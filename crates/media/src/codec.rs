//! Image codec seam.

use bytes::Bytes;

use crate::error::TransformError;
use crate::metadata::ImageMetadata;

/// Platform image facility used by the transformer.
///
/// Implementations are synchronous and may be CPU-heavy; callers run them
/// off the async executor.
pub trait MediaCodec: Send + Sync {
    /// Reads the metadata properties of an image.
    fn read_metadata(&self, payload: &[u8]) -> Result<ImageMetadata, TransformError>;

    /// Rewrites the image's metadata without re-encoding pixels.
    fn write_metadata(
        &self,
        payload: &[u8],
        metadata: &ImageMetadata,
    ) -> Result<Bytes, TransformError>;

    /// Re-encodes the image as JPEG at `quality` (0.01..=1.0), embedding `metadata`.
    ///
    /// Dimensions and orientation in `metadata` must be updated to match
    /// the encoded pixels.
    fn encode_jpeg(
        &self,
        payload: &[u8],
        quality: f32,
        metadata: &ImageMetadata,
    ) -> Result<Bytes, TransformError>;
}

/// Codec for hosts without an image facility.
///
/// Reports no metadata and refuses to encode, so images pass through
/// untouched unless a recompression or format coercion is required.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl MediaCodec for PassthroughCodec {
    fn read_metadata(&self, _payload: &[u8]) -> Result<ImageMetadata, TransformError> {
        Ok(ImageMetadata::new())
    }

    fn write_metadata(
        &self,
        payload: &[u8],
        _metadata: &ImageMetadata,
    ) -> Result<Bytes, TransformError> {
        Ok(Bytes::copy_from_slice(payload))
    }

    fn encode_jpeg(
        &self,
        _payload: &[u8],
        _quality: f32,
        _metadata: &ImageMetadata,
    ) -> Result<Bytes, TransformError> {
        Err(TransformError::EncoderUnavailable)
    }
}
