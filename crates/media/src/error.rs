//! Media error types.

/// Errors produced while fetching an asset from the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrieveError {
    #[error("asset unavailable: {0}")]
    SourceUnavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unsupported asset format")]
    UnsupportedFormat,

    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error("asset archive session expired")]
    Unauthorized,
}

impl From<std::io::Error> for RetrieveError {
    fn from(e: std::io::Error) -> Self {
        RetrieveError::SourceUnavailable(e.to_string())
    }
}

/// Errors produced while transforming an asset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("cannot decode image: {0}")]
    CannotDecode(String),

    #[error("cannot encode image: {0}")]
    CannotEncode(String),

    /// The host has no encoder, so the same request can never succeed.
    #[error("no image encoder available")]
    EncoderUnavailable,

    #[error("format {0} is not accepted by the server")]
    FormatRejectedByServer(String),
}
