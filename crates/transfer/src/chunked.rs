use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkPlan
// ---------------------------------------------------------------------------

/// How a payload is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub payload_size: usize,
    pub chunk_size_bytes: usize,
    pub total_chunks: usize,
}

impl ChunkPlan {
    /// Plans `payload_size` bytes in chunks of `chunk_size` bytes.
    ///
    /// An empty payload still yields one (empty) chunk so that the server
    /// receives a final request.
    pub fn new(payload_size: usize, chunk_size: usize) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidConfiguration(
                "chunk size must be greater than zero".into(),
            ));
        }
        let total_chunks = payload_size.div_ceil(chunk_size).max(1);
        Ok(Self {
            payload_size,
            chunk_size_bytes: chunk_size,
            total_chunks,
        })
    }

    /// Byte range `[start, end)` of chunk `index`.
    pub fn range(&self, index: usize) -> Result<(usize, usize), TransferError> {
        if index >= self.total_chunks {
            return Err(TransferError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        let start = index * self.chunk_size_bytes;
        let end = (start + self.chunk_size_bytes).min(self.payload_size);
        Ok((start, end.max(start)))
    }

    /// Size of the last chunk.
    pub fn last_chunk_len(&self) -> usize {
        self.payload_size - (self.total_chunks - 1) * self.chunk_size_bytes
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// One slice of a payload, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub offset: usize,
    pub data: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Splits `payload` into ordered chunks of `chunk_size` bytes.
///
/// Slices share the payload's buffer; nothing is copied.
pub fn split(payload: &Bytes, chunk_size: usize) -> Result<Vec<Chunk>, TransferError> {
    let plan = ChunkPlan::new(payload.len(), chunk_size)?;
    (0..plan.total_chunks)
        .map(|index| {
            let (start, end) = plan.range(index)?;
            Ok(Chunk {
                index,
                offset: start,
                data: payload.slice(start..end),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ChunkAcks
// ---------------------------------------------------------------------------

/// Tracks server acknowledgements; chunks must be acknowledged in order.
#[derive(Debug, Clone)]
pub struct ChunkAcks {
    total: usize,
    acked: usize,
}

impl ChunkAcks {
    pub fn new(plan: &ChunkPlan) -> Self {
        Self {
            total: plan.total_chunks,
            acked: 0,
        }
    }

    /// Records the acknowledgement of chunk `index`.
    pub fn ack(&mut self, index: usize) -> Result<(), TransferError> {
        if index >= self.total {
            return Err(TransferError::ChunkOutOfRange {
                index,
                total: self.total,
            });
        }
        if index != self.acked {
            return Err(TransferError::OutOfOrderAck {
                expected: self.acked,
                got: index,
            });
        }
        self.acked += 1;
        Ok(())
    }

    /// Index of the next chunk allowed on the wire, or `None` when done.
    pub fn next_index(&self) -> Option<usize> {
        (self.acked < self.total).then_some(self.acked)
    }

    pub fn acknowledged(&self) -> usize {
        self.acked
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.total
    }

    pub fn is_complete(&self) -> bool {
        self.acked == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: usize = 1_000_000;

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64);
        assert_ne!(c1, checksum_bytes(b"hello"));
    }

    #[test]
    fn plan_ten_megabytes_in_three_megabyte_chunks() {
        let plan = ChunkPlan::new(10 * MB, 3 * MB).unwrap();
        assert_eq!(plan.total_chunks, 4);
        assert_eq!(plan.last_chunk_len(), MB);
        assert_eq!(plan.range(3).unwrap(), (9 * MB, 10 * MB));
    }

    #[test]
    fn plan_exact_multiple_has_full_last_chunk() {
        let plan = ChunkPlan::new(12, 4).unwrap();
        assert_eq!(plan.total_chunks, 3);
        assert_eq!(plan.last_chunk_len(), 4);
    }

    #[test]
    fn plan_rejects_zero_chunk_size() {
        assert!(matches!(
            ChunkPlan::new(10, 0),
            Err(TransferError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn plan_range_out_of_bounds() {
        let plan = ChunkPlan::new(10, 4).unwrap();
        assert_eq!(
            plan.range(3),
            Err(TransferError::ChunkOutOfRange { index: 3, total: 3 })
        );
    }

    #[test]
    fn split_sizes_and_reconstruction() {
        for (n, c) in [(10usize, 4usize), (12, 4), (1, 7), (1000, 1), (999, 100)] {
            let payload = Bytes::from((0..n).map(|i| (i % 251) as u8).collect::<Vec<_>>());
            let chunks = split(&payload, c).unwrap();

            assert_eq!(chunks.len(), n.div_ceil(c), "n={n} c={c}");
            for chunk in &chunks[..chunks.len() - 1] {
                assert_eq!(chunk.len(), c);
            }
            let last = chunks.last().unwrap().len();
            assert_eq!(last, if n % c == 0 { c } else { n % c });

            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.to_vec()).collect();
            assert_eq!(joined, payload.to_vec());
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, i);
                assert_eq!(chunk.offset, i * c);
            }
        }
    }

    #[test]
    fn split_empty_payload_yields_one_empty_chunk() {
        let chunks = split(&Bytes::new(), 4).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn split_zero_chunk_size_is_error() {
        assert!(split(&Bytes::from_static(b"abc"), 0).is_err());
    }

    #[test]
    fn acks_in_order() {
        let plan = ChunkPlan::new(10, 4).unwrap();
        let mut acks = ChunkAcks::new(&plan);
        assert_eq!(acks.next_index(), Some(0));
        acks.ack(0).unwrap();
        acks.ack(1).unwrap();
        assert!(acks.is_last(2));
        acks.ack(2).unwrap();
        assert!(acks.is_complete());
        assert_eq!(acks.next_index(), None);
        assert_eq!(acks.acknowledged(), 3);
    }

    #[test]
    fn acks_reject_out_of_order() {
        let plan = ChunkPlan::new(10, 4).unwrap();
        let mut acks = ChunkAcks::new(&plan);
        assert_eq!(
            acks.ack(1),
            Err(TransferError::OutOfOrderAck {
                expected: 0,
                got: 1
            })
        );
        acks.ack(0).unwrap();
        assert!(acks.ack(0).is_err());
        assert!(matches!(
            acks.ack(5),
            Err(TransferError::ChunkOutOfRange { .. })
        ));
    }
}
