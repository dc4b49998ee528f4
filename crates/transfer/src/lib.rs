//! Chunk planning, acknowledgement tracking and progress math for uploads.
//!
//! Everything here is pure: no I/O, no clocks. The uploader drives it.

mod chunked;
mod progress;

pub use chunked::{Chunk, ChunkAcks, ChunkPlan, checksum_bytes, split};
pub use progress::{ProgressGate, item_fraction};

/// Default chunk size: 500 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 500 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("acknowledgement out of order: expected chunk {expected}, got {got}")]
    OutOfOrderAck { expected: usize, got: usize },

    #[error("chunk {index} is beyond the plan of {total} chunks")]
    ChunkOutOfRange { index: usize, total: usize },
}
