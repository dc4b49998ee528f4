//! Sequential chunk upload with acknowledgement tracking.

use std::sync::Arc;

use bytes::Bytes;
use photolift_protocol::constants::field;
use photolift_protocol::{ServerEnvelope, UploadMetadata, UploadResult};
use photolift_transfer::{ChunkAcks, ChunkPlan, checksum_bytes, item_fraction, split};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::transport::{ByteProgress, ChunkRequest, ChunkTransport, TransportResponse};

/// Progress of the chunk currently on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub bytes_sent: u64,
    pub chunk_len: u64,
}

impl ChunkProgress {
    /// Fraction of the whole payload sent.
    pub fn fraction(&self) -> f64 {
        item_fraction(
            self.chunk_index,
            self.total_chunks,
            self.bytes_sent,
            self.chunk_len,
        )
    }
}

/// Result of a finished upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub remote_id: i64,
    pub result: UploadResult,
    pub chunks_sent: usize,
}

/// Uploads payloads chunk by chunk through a [`ChunkTransport`].
pub struct ChunkedUploader {
    transport: Arc<dyn ChunkTransport>,
}

impl ChunkedUploader {
    pub fn new(transport: Arc<dyn ChunkTransport>) -> Self {
        Self { transport }
    }

    /// Uploads `payload`, sending chunk `i` only after chunk `i - 1` was acknowledged.
    ///
    /// Any chunk failure fails the whole transfer; calling `upload` again
    /// restarts at chunk 0. The last chunk's response carries the remote id.
    pub async fn upload(
        &self,
        payload: Bytes,
        mime_type: &str,
        metadata: &UploadMetadata,
        chunk_size_bytes: usize,
        on_progress: &mut (dyn FnMut(ChunkProgress) + Send),
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, UploadError> {
        check_cancelled(cancel)?;

        let plan = ChunkPlan::new(payload.len(), chunk_size_bytes)?;
        let chunks = split(&payload, chunk_size_bytes)?;
        let original_sum = checksum_bytes(&payload);
        let mut acks = ChunkAcks::new(&plan);

        let mut metadata = metadata.clone();
        metadata.mime_type = mime_type.to_string();

        info!(
            file = %metadata.file_name,
            bytes = plan.payload_size,
            chunks = plan.total_chunks,
            "starting upload"
        );

        for chunk in chunks {
            check_cancelled(cancel)?;

            let index = chunk.index;
            let chunk_len = chunk.len() as u64;
            let mut fields = metadata.form_fields(index, plan.total_chunks, &original_sum);
            fields.push((field::CHUNK_SUM, checksum_bytes(&chunk.data)));

            let request = ChunkRequest {
                index,
                total: plan.total_chunks,
                fields,
                file_name: metadata.file_name.clone(),
                mime_type: metadata.mime_type.clone(),
                data: chunk.data,
            };

            let progress_of = |sent: u64| ChunkProgress {
                chunk_index: index,
                total_chunks: plan.total_chunks,
                bytes_sent: sent.min(chunk_len),
                chunk_len,
            };

            let response = self
                .send(request, &mut |sent: u64| on_progress(progress_of(sent)), cancel)
                .await?;
            let envelope = interpret(&response)?;
            acks.ack(index)?;
            on_progress(progress_of(chunk_len));

            debug!(
                chunk = index,
                total = plan.total_chunks,
                bytes = chunk_len,
                "chunk acknowledged"
            );

            if acks.is_last(index) {
                let result = envelope
                    .upload_result()
                    .map_err(|e| UploadError::MalformedResponse(e.to_string()))?
                    .ok_or_else(|| {
                        UploadError::MalformedResponse("final response without result".into())
                    })?;
                let remote_id = result.image_id.ok_or_else(|| {
                    UploadError::MalformedResponse("final response without image_id".into())
                })?;

                info!(file = %metadata.file_name, remote_id, "upload complete");
                return Ok(UploadReceipt {
                    remote_id,
                    result,
                    chunks_sent: acks.acknowledged(),
                });
            }
        }

        Err(UploadError::MalformedResponse(
            "no final response received".into(),
        ))
    }

    /// Sends one chunk, racing it against `cancel` and forwarding byte progress.
    async fn send(
        &self,
        request: ChunkRequest,
        on_bytes: &mut (dyn FnMut(u64) + Send),
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, UploadError> {
        let (progress, mut rx) = ByteProgress::channel();
        let post = self.transport.post_chunk(request, progress);
        tokio::pin!(post);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                Some(sent) = rx.recv() => on_bytes(sent),
                result = &mut post => break result,
            }
        };
        while let Ok(sent) = rx.try_recv() {
            on_bytes(sent);
        }
        result
    }
}

/// Maps an HTTP response to an envelope or an upload error.
fn interpret(response: &TransportResponse) -> Result<ServerEnvelope, UploadError> {
    match response.status {
        200..=299 => {}
        401 | 403 => return Err(UploadError::Unauthorized),
        413 | 415 => {
            return Err(UploadError::PayloadRejected(format!(
                "HTTP {}",
                response.status
            )));
        }
        status => {
            warn!(status, "chunk request failed");
            return Err(UploadError::ServerRejected(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&response.body)
            )));
        }
    }

    let envelope = ServerEnvelope::from_slice(&response.body)
        .map_err(|e| UploadError::MalformedResponse(e.to_string()))?;
    if envelope.is_ok() {
        Ok(envelope)
    } else if envelope.is_unauthorized() {
        Err(UploadError::Unauthorized)
    } else {
        Err(UploadError::ServerRejected(envelope.failure_message()))
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        Err(UploadError::Cancelled)
    } else {
        Ok(())
    }
}
