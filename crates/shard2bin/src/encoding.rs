//! Numeric representations for stored weights.

use crate::error::{ConvertError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Values per Q40 group.
pub const Q40_GROUP_SIZE: usize = 32;
/// Bytes per encoded Q40 group: one f16 scale plus 16 packed nibble pairs.
pub const Q40_GROUP_BYTES: usize = 18;

/// Encoding chosen for a tensor in the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EncodingMode {
    #[serde(rename = "float32")]
    F32,
    #[serde(rename = "float16")]
    F16,
    #[serde(rename = "q40")]
    Q40,
}

impl EncodingMode {
    /// Byte count of `n` values in this encoding.
    ///
    /// Q40 requires `n` to be a multiple of [`Q40_GROUP_SIZE`].
    pub fn size_of(self, n: u64) -> Result<u64> {
        match self {
            Self::F32 => Ok(n * 4),
            Self::F16 => Ok(n * 2),
            Self::Q40 => {
                let group = Q40_GROUP_SIZE as u64;
                if n % group != 0 {
                    return Err(ConvertError::QuantizationPrecondition { len: n as usize });
                }
                Ok(n / group * Q40_GROUP_BYTES as u64)
            }
        }
    }

    /// Values a column band must be a multiple of to be encoded on its own.
    pub const fn column_alignment(self) -> usize {
        match self {
            Self::F32 | Self::F16 => 1,
            Self::Q40 => Q40_GROUP_SIZE,
        }
    }

    /// Name used on the command line and in output file names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::F16 => "float16",
            Self::Q40 => "q40",
        }
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncodingMode {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "float32" | "f32" => Ok(Self::F32),
            "float16" | "f16" => Ok(Self::F16),
            "q40" | "q4_0" => Ok(Self::Q40),
            _ => Err(ConvertError::UnknownEncoding(s.to_string())),
        }
    }
}
