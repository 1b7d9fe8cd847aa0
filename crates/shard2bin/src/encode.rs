//! Tensor serialization for each [`EncodingMode`].

use crate::encoding::EncodingMode;
use crate::error::Result;
use crate::q40::quantize_q40;
use half::f16;

/// Serialize `values` (row-major, flat) in the given encoding.
///
/// All multi-byte values are little-endian. The returned length always
/// equals `encoding.size_of(values.len())`.
pub fn encode(values: &[f32], encoding: EncodingMode) -> Result<Vec<u8>> {
    let bytes = match encoding {
        EncodingMode::F32 => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        EncodingMode::F16 => values.iter().flat_map(|&v| f16::from_f32(v).to_le_bytes()).collect(),
        EncodingMode::Q40 => quantize_q40(values)?,
    };
    Ok(bytes)
}
