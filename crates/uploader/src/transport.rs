//! HTTP transport seam for chunk requests.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::UploadError;

/// One multipart chunk request.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub index: usize,
    pub total: usize,
    /// Text fields, in order.
    pub fields: Vec<(&'static str, String)>,
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Raw HTTP response to a chunk request.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Reports bytes of the chunk body handed to the network so far.
#[derive(Debug, Clone)]
pub struct ByteProgress {
    tx: mpsc::UnboundedSender<u64>,
}

impl ByteProgress {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, sent: u64) {
        let _ = self.tx.send(sent);
    }
}

/// Sends chunk requests to the server.
///
/// Dropping the returned future must abort the request.
pub trait ChunkTransport: Send + Sync {
    fn post_chunk(
        &self,
        request: ChunkRequest,
        progress: ByteProgress,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, UploadError>> + Send + '_>>;
}
