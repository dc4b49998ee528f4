//! Chunked multipart uploads to the photo server.
//!
//! [`ChunkedUploader`] drives the chunk sequence and interprets responses;
//! [`ChunkTransport`] is the HTTP seam, implemented by [`ReqwestTransport`].

pub mod error;
pub mod http;
pub mod transport;
pub mod uploader;

pub use error::UploadError;
pub use http::{Credentials, ReqwestTransport};
pub use transport::{ByteProgress, ChunkRequest, ChunkTransport, TransportResponse};
pub use uploader::{ChunkProgress, ChunkedUploader, UploadReceipt};
