//! Binary encoding of sketches.
//!
//! Layout: `[tag: u8][precision: u8][body]`.
//!
//! - `tag = 1` (dense): the body is every register, one byte each.
//! - `tag = 2` (sparse): the body is a little-endian `u32` entry count followed
//!   by `(index: u32 LE, rank: u8)` pairs in ascending index order.
//!
//! The encoder picks whichever form is smaller. Freshly built per-batch
//! sketches are almost always sparse.

use crate::error::SketchError;
use crate::hyperloglog::{HyperLogLog, MAX_PRECISION, MIN_PRECISION};

const TAG_DENSE: u8 = 1;
const TAG_SPARSE: u8 = 2;
const HEADER_LEN: usize = 2;
const SPARSE_ENTRY_LEN: usize = 5;

impl HyperLogLog {
    /// Serializes the sketch.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let occupied = self.registers.iter().filter(|&&r| r != 0).count();
        let sparse_len = HEADER_LEN + 4 + occupied * SPARSE_ENTRY_LEN;
        let dense_len = HEADER_LEN + self.registers.len();

        if sparse_len < dense_len {
            let mut out = Vec::with_capacity(sparse_len);
            out.push(TAG_SPARSE);
            out.push(self.precision);
            out.extend_from_slice(&(occupied as u32).to_le_bytes());
            for (index, &rank) in self.registers.iter().enumerate() {
                if rank != 0 {
                    out.extend_from_slice(&(index as u32).to_le_bytes());
                    out.push(rank);
                }
            }
            out
        } else {
            let mut out = Vec::with_capacity(dense_len);
            out.push(TAG_DENSE);
            out.push(self.precision);
            out.extend_from_slice(&self.registers);
            out
        }
    }

    /// Decodes a sketch produced by [`HyperLogLog::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns `SketchError::Malformed` for truncated input, unknown tags,
    /// out-of-range indices or ranks, and `SketchError::InvalidPrecision` for
    /// an unsupported precision byte.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let [tag, precision, body @ ..] = bytes else {
            return Err(SketchError::Malformed("missing header".to_owned()));
        };
        if !(MIN_PRECISION..=MAX_PRECISION).contains(precision) {
            return Err(SketchError::InvalidPrecision(*precision));
        }
        let mut sketch = Self::with_precision(*precision)?;
        let max_rank = sketch.max_rank();

        match *tag {
            TAG_DENSE => {
                if body.len() != sketch.registers.len() {
                    return Err(SketchError::Malformed(format!(
                        "dense body has {} bytes, expected {}",
                        body.len(),
                        sketch.registers.len()
                    )));
                }
                if let Some(rank) = body.iter().find(|&&r| r > max_rank) {
                    return Err(SketchError::Malformed(format!("rank {rank} out of range")));
                }
                sketch.registers.copy_from_slice(body);
            }
            TAG_SPARSE => {
                let (count, entries) = body
                    .split_first_chunk::<4>()
                    .ok_or_else(|| SketchError::Malformed("missing entry count".to_owned()))?;
                let count = u32::from_le_bytes(*count) as usize;
                if entries.len() != count * SPARSE_ENTRY_LEN {
                    return Err(SketchError::Malformed(format!(
                        "sparse body holds {} bytes for {count} entries",
                        entries.len()
                    )));
                }
                for entry in entries.chunks_exact(SPARSE_ENTRY_LEN) {
                    let index =
                        u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as usize;
                    let rank = entry[4];
                    if index >= sketch.registers.len() || rank == 0 || rank > max_rank {
                        return Err(SketchError::Malformed(format!(
                            "invalid sparse entry ({index}, {rank})"
                        )));
                    }
                    sketch.registers[index] = rank;
                }
            }
            other => {
                return Err(SketchError::Malformed(format!("unknown tag {other}")));
            }
        }

        Ok(sketch)
    }
}
