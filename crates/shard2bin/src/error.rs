//! Error types for the converter library.

use std::io;
use thiserror::Error;

/// Every failure that aborts a conversion run.
///
/// The only non-fatal anomaly (a tensor left incomplete at the end of the
/// run) is not an error; it is reported through
/// [`ConversionReport`](crate::ConversionReport).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid model parameters: {0}")]
    Config(String),

    #[error("unknown tensor: {0}")]
    UnknownTensor(String),

    #[error("q40 quantization needs a multiple of 32 values, got {len}")]
    QuantizationPrecondition { len: usize },

    #[error("cannot merge slices of {name}: {detail}")]
    ShapeMismatch { name: String, detail: String },

    #[error("tensor {name} overflows its slot: {written} bytes written, {expected} expected")]
    SizeOverflow { name: String, written: u64, expected: u64 },

    #[error("shard {source_name}: {reason}")]
    Shard { source_name: String, reason: String },

    #[error("unknown encoding `{0}` (expected float32, float16 or q40)")]
    UnknownEncoding(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConvertError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn shard(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Shard { source_name: source_name.into(), reason: reason.into() }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, ConvertError>;
