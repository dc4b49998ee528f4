//! Upload error types.

use photolift_transfer::TransferError;

/// Errors produced while uploading a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("network error: {0}")]
    Network(String),

    /// The server answered `stat == "fail"`; carries its message verbatim.
    #[error("{0}")]
    ServerRejected(String),

    #[error("cancelled")]
    Cancelled,

    #[error("not authorized")]
    Unauthorized,

    #[error("payload rejected: {0}")]
    PayloadRejected(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        UploadError::InvalidConfiguration(e.to_string())
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Network(e.to_string())
    }
}
