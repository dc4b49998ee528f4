//! Queue configuration.

use serde::{Deserialize, Serialize};

fn default_chunk_size() -> usize {
    photolift_transfer::DEFAULT_CHUNK_SIZE
}

fn default_max_failed() -> usize {
    5
}

fn default_finalize_attempts() -> u32 {
    3
}

fn default_finalize_retry_delay_ms() -> u64 {
    500
}

fn default_allowed_mime_types() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/heic",
        "image/webp",
        "video/mp4",
        "video/quicktime",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}

/// Settings of the upload queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Deferred failures tolerated before the worker pauses itself.
    #[serde(default = "default_max_failed")]
    pub max_failed_uploads: usize,
    /// Attempts at attaching a finished upload to its collection.
    #[serde(default = "default_finalize_attempts")]
    pub finalize_attempts: u32,
    #[serde(default = "default_finalize_retry_delay_ms")]
    pub finalize_retry_delay_ms: u64,
    /// MIME types the server accepts. Empty accepts everything.
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    /// Queue finished uploads for moderation.
    #[serde(default)]
    pub moderate_uploads: bool,
    /// Wait for `resume` before processing.
    #[serde(default)]
    pub start_paused: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            max_failed_uploads: default_max_failed(),
            finalize_attempts: default_finalize_attempts(),
            finalize_retry_delay_ms: default_finalize_retry_delay_ms(),
            allowed_mime_types: default_allowed_mime_types(),
            moderate_uploads: false,
            start_paused: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.chunk_size_bytes, 500 * 1024);
        assert_eq!(config.max_failed_uploads, 5);
        assert_eq!(config.finalize_attempts, 3);
        assert!(config.allowed_mime_types.contains(&"image/jpeg".to_string()));
    }

    #[test]
    fn empty_json_uses_defaults() {
        let config: UploadConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, UploadConfig::default());
    }

    #[test]
    fn partial_json_overrides() {
        let config: UploadConfig =
            serde_json::from_str(r#"{"chunkSizeBytes":1024,"moderateUploads":true}"#).unwrap();
        assert_eq!(config.chunk_size_bytes, 1024);
        assert!(config.moderate_uploads);
        assert_eq!(config.max_failed_uploads, 5);
    }
}
