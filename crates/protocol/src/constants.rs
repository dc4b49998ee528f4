use std::time::Duration;

/// Identifier of the upload task registered with the OS background scheduler.
pub const BACKGROUND_TASK_ID: &str = "org.photolift.upload-manager";

/// Earliest a follow-up background window may be requested after the current one.
pub const MIN_RESCHEDULE_DELAY: Duration = Duration::from_secs(60);

/// Server method that accepts chunked uploads.
pub const UPLOAD_METHOD: &str = "pwg.images.uploadAsync";

/// Path of the web service endpoint relative to the server base URL.
pub const WS_PATH: &str = "/ws.php";

/// Name of the multipart part carrying the chunk bytes.
pub const FILE_PART: &str = "file";

/// Server error code reported when the session is no longer valid.
pub const ERR_UNAUTHORIZED: i32 = 401;

/// Multipart field names.
pub mod field {
    pub const CHUNK: &str = "chunk";
    pub const CHUNKS: &str = "chunks";
    pub const FILE_NAME: &str = "fileName";
    pub const CREATION_DATE: &str = "creationDate";
    pub const TITLE: &str = "title";
    pub const CATEGORY_ID: &str = "categoryId";
    pub const PRIVACY_LEVEL: &str = "privacyLevel";
    pub const AUTHOR: &str = "author";
    pub const DESCRIPTION: &str = "description";
    pub const TAG_IDS: &str = "tagIds";
    pub const MIME_TYPE: &str = "mimeType";
    pub const ORIGINAL_SUM: &str = "original_sum";
    pub const CHUNK_SUM: &str = "chunk_sum";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
}
