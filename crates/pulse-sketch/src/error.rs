//! Sketch error types.

use thiserror::Error;

/// Errors raised when building, merging, or decoding a sketch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SketchError {
    /// The requested precision is outside the supported range.
    #[error("invalid precision {0}: must be between 4 and 18")]
    InvalidPrecision(u8),

    /// Two sketches with different register counts cannot be merged.
    #[error("precision mismatch: {left} vs {right}")]
    PrecisionMismatch {
        /// Precision of the receiving sketch.
        left: u8,
        /// Precision of the incoming sketch.
        right: u8,
    },

    /// A serialized sketch could not be decoded.
    #[error("malformed sketch encoding: {0}")]
    Malformed(String),
}
