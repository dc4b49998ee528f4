//! Metadata fields sent with every chunk request.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::constants::field;

/// `creationDate` format expected by the server.
pub const CREATION_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Descriptive metadata attached to an upload.
///
/// `file_name` and `mime_type` are overwritten by the transformer once
/// the final payload is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub file_name: String,
    pub creation_date: NaiveDateTime,
    #[serde(default)]
    pub title: String,
    pub category_id: i64,
    #[serde(default)]
    pub privacy_level: i32,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tag_ids: Vec<i64>,
    #[serde(default)]
    pub mime_type: String,
}

impl UploadMetadata {
    /// Builds the multipart text fields for one chunk.
    ///
    /// `chunk` is 0-based; `chunks` is the total count. `original_sum`
    /// identifies the payload so the server can group chunks of one attempt.
    pub fn form_fields(
        &self,
        chunk: usize,
        chunks: usize,
        original_sum: &str,
    ) -> Vec<(&'static str, String)> {
        vec![
            (field::CHUNK, chunk.to_string()),
            (field::CHUNKS, chunks.to_string()),
            (field::FILE_NAME, self.file_name.clone()),
            (field::CREATION_DATE, self.creation_date_string()),
            (field::TITLE, self.title.clone()),
            (field::CATEGORY_ID, self.category_id.to_string()),
            (field::PRIVACY_LEVEL, self.privacy_level.to_string()),
            (field::AUTHOR, self.author.clone()),
            (field::DESCRIPTION, self.description.clone()),
            (field::TAG_IDS, self.tag_ids_string()),
            (field::MIME_TYPE, self.mime_type.clone()),
            (field::ORIGINAL_SUM, original_sum.to_string()),
        ]
    }

    pub fn creation_date_string(&self) -> String {
        self.creation_date.format(CREATION_DATE_FORMAT).to_string()
    }

    /// Tag ids joined with commas.
    pub fn tag_ids_string(&self) -> String {
        self.tag_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}
