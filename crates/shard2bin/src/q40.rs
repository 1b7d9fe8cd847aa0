//! Q4_0-style 4-bit block quantization ("Q40").
//!
//! Each group of 32 `f32` values becomes 18 bytes: an f16 scale `delta`
//! followed by 16 bytes of packed 4-bit indices. Byte `i` holds the index of
//! value `i` in its low nibble and the index of value `i + 16` in its high
//! nibble. A value decodes as `(index - 8) * delta`.
//!
//! A truncated index that comes out negative is masked with `0xF` (two's
//! complement low bits) rather than clamped to zero, so existing Q40 files
//! are reproduced byte for byte.

use crate::encoding::{Q40_GROUP_BYTES, Q40_GROUP_SIZE};
use crate::error::{ConvertError, Result};
use half::f16;

const HALF_GROUP: usize = Q40_GROUP_SIZE / 2;

/// Quantize `values` into Q40 blocks.
///
/// `values.len()` must be a multiple of 32.
pub fn quantize_q40(values: &[f32]) -> Result<Vec<u8>> {
    if values.len() % Q40_GROUP_SIZE != 0 {
        return Err(ConvertError::QuantizationPrecondition { len: values.len() });
    }

    let mut out = Vec::with_capacity(values.len() / Q40_GROUP_SIZE * Q40_GROUP_BYTES);
    for group in values.chunks_exact(Q40_GROUP_SIZE) {
        quantize_group(group, &mut out);
    }
    tracing::trace!(
        input_bytes = values.len() * 4,
        output_bytes = out.len(),
        "quantized q40"
    );
    Ok(out)
}

fn quantize_group(group: &[f32], out: &mut Vec<u8>) {
    let gmax = group.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let gmin = group.iter().copied().fold(f32::INFINITY, f32::min);
    let abs_max = if -gmin > gmax { gmin } else { gmax };

    // -0.0 for an all-zero group
    let delta = abs_max / -8.0;
    let inv_scale = if delta != 0.0 { 1.0 / delta } else { 0.0 };

    out.extend_from_slice(&f16::from_f32(delta).to_le_bytes());
    for i in 0..HALF_GROUP {
        let lo = nibble(group[i], inv_scale);
        let hi = nibble(group[i + HALF_GROUP], inv_scale);
        out.push(lo | (hi << 4));
    }
}

/// Index for one value, truncated toward zero, capped at 15 and masked.
#[inline]
fn nibble(value: f32, inv_scale: f32) -> u8 {
    let x = value * inv_scale + 8.5;
    let index = (x as i32).min(15);
    (index & 0xF) as u8
}

/// Reconstruct `f32` values from Q40 blocks.
pub fn dequantize_q40(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % Q40_GROUP_BYTES != 0 {
        return Err(ConvertError::QuantizationPrecondition {
            len: bytes.len() / Q40_GROUP_BYTES * Q40_GROUP_SIZE,
        });
    }

    let mut out = Vec::with_capacity(bytes.len() / Q40_GROUP_BYTES * Q40_GROUP_SIZE);
    for block in bytes.chunks_exact(Q40_GROUP_BYTES) {
        let delta = f16::from_le_bytes([block[0], block[1]]).to_f32();
        let packed = &block[2..];
        let mut group = [0f32; Q40_GROUP_SIZE];
        for (i, &b) in packed.iter().enumerate() {
            group[i] = (f32::from(b & 0xF) - 8.0) * delta;
            group[i + HALF_GROUP] = (f32::from(b >> 4) - 8.0) * delta;
        }
        out.extend_from_slice(&group);
    }
    Ok(out)
}
