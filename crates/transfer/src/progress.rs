/// Fraction of an item's upload completed while chunk `chunk_index` streams.
///
/// Computed as `(chunk_index + sent / chunk_len) / total_chunks`, clamped to
/// `0.0..=1.0`. An empty chunk counts as fully sent.
pub fn item_fraction(chunk_index: usize, total_chunks: usize, sent: u64, chunk_len: u64) -> f64 {
    if total_chunks == 0 {
        return 0.0;
    }
    let within = if chunk_len == 0 || sent >= chunk_len {
        1.0
    } else {
        sent as f64 / chunk_len as f64
    };
    ((chunk_index as f64 + within) / total_chunks as f64).clamp(0.0, 1.0)
}

/// Filters a stream of fractions so observers only see increasing values.
///
/// Lives as long as the item it tracks, retries included.
#[derive(Debug, Clone, Default)]
pub struct ProgressGate {
    last: Option<f64>,
}

impl ProgressGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `Some(fraction)` if it advances past everything seen so far.
    pub fn offer(&mut self, fraction: f64) -> Option<f64> {
        if !fraction.is_finite() {
            return None;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        match self.last {
            Some(last) if fraction <= last => None,
            _ => {
                self.last = Some(fraction);
                Some(fraction)
            }
        }
    }

    /// Highest fraction reported so far.
    pub fn current(&self) -> f64 {
        self.last.unwrap_or(0.0)
    }
}
