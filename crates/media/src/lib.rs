//! Asset retrieval and transformation for the upload pipeline.
//!
//! The [`AssetRetriever`] pulls bytes out of an [`AssetStore`] (possibly
//! downloading from a remote archive) and the [`AssetTransformer`] rewrites
//! them into something the server accepts: private metadata stripped,
//! recompressed, coerced to JPEG, and labelled with a sniffed MIME type.

pub mod asset;
pub mod codec;
pub mod error;
pub mod jpeg;
pub mod metadata;
pub mod preset;
pub mod retriever;
pub mod sniff;
pub mod store;
pub mod transformer;

pub use asset::{AssetDescriptor, AssetKind, RawAsset, TransformOptions, TransformedAsset};
pub use codec::{MediaCodec, PassthroughCodec};
pub use error::{RetrieveError, TransformError};
pub use metadata::ImageMetadata;
pub use preset::{ExportPreset, negotiate_preset};
pub use retriever::AssetRetriever;
pub use sniff::{Signature, sniff};
pub use store::{AssetStore, ExportedVideo, ImageRequest, ProgressSink};
pub use transformer::AssetTransformer;
