//! Wire protocol types for the photolift upload pipeline.
//!
//! Covers the server response envelope, the multipart form fields sent
//! with every chunk, and the constants shared by the client crates.

pub mod constants;
pub mod envelope;
pub mod fields;

// Re-export primary types for convenience.
pub use constants::{BACKGROUND_TASK_ID, UPLOAD_METHOD};
pub use envelope::{EnvelopeError, ServerEnvelope, Stat, UploadResult};
pub use fields::{CREATION_DATE_FORMAT, UploadMetadata};
