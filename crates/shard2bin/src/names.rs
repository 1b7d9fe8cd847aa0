//! Tensor naming conventions of Meta-style consolidated checkpoints.
//!
//! Every shard tensor name is parsed once into a [`TensorKind`]; offset,
//! size and encoding decisions then match over that closed set instead of
//! repeating string comparisons.

use crate::encoding::EncodingMode;
use crate::error::{ConvertError, Result};
use std::fmt;

/// The nine per-layer fields, in block order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockField {
    AttentionNorm,
    FfnNorm,
    Wq,
    Wk,
    Wv,
    Wo,
    W1,
    W2,
    W3,
}

impl BlockField {
    pub const ALL: [BlockField; 9] = [
        Self::AttentionNorm,
        Self::FfnNorm,
        Self::Wq,
        Self::Wk,
        Self::Wv,
        Self::Wo,
        Self::W1,
        Self::W2,
        Self::W3,
    ];

    /// Name suffix after `layers.<i>.`.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::AttentionNorm => "attention_norm.weight",
            Self::FfnNorm => "ffn_norm.weight",
            Self::Wq => "attention.wq.weight",
            Self::Wk => "attention.wk.weight",
            Self::Wv => "attention.wv.weight",
            Self::Wo => "attention.wo.weight",
            Self::W1 => "feed_forward.w1.weight",
            Self::W2 => "feed_forward.w2.weight",
            Self::W3 => "feed_forward.w3.weight",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.suffix() == suffix)
    }

    pub const fn is_norm(self) -> bool {
        matches!(self, Self::AttentionNorm | Self::FfnNorm)
    }
}

/// Parsed identity of a checkpoint tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorKind {
    TokenEmbedding,
    LayerField { layer: u32, field: BlockField },
    FinalNorm,
    RopeFreqs,
    OutputWeight,
}

impl TensorKind {
    /// Parse a dotted checkpoint name.
    ///
    /// Layer indices at or above `n_layers` have no slot in the output and
    /// are rejected like any other unrecognized name.
    pub fn parse(name: &str, n_layers: u32) -> Result<Self> {
        let kind = match name {
            "tok_embeddings.weight" => Self::TokenEmbedding,
            "norm.weight" => Self::FinalNorm,
            "rope.freqs" => Self::RopeFreqs,
            "output.weight" => Self::OutputWeight,
            _ => {
                let unknown = || ConvertError::UnknownTensor(name.to_string());
                let rest = name.strip_prefix("layers.").ok_or_else(unknown)?;
                let (index, suffix) = rest.split_once('.').ok_or_else(unknown)?;
                let layer = parse_index(index).ok_or_else(unknown)?;
                let field = BlockField::from_suffix(suffix).ok_or_else(unknown)?;
                if layer >= n_layers {
                    return Err(unknown());
                }
                Self::LayerField { layer, field }
            }
        };
        Ok(kind)
    }

    /// Encoding this tensor is stored in, given the run's target encoding.
    pub fn encoding(self, target: EncodingMode) -> EncodingMode {
        match self {
            Self::TokenEmbedding | Self::FinalNorm | Self::RopeFreqs => EncodingMode::F32,
            Self::LayerField { field, .. } if field.is_norm() => EncodingMode::F32,
            Self::LayerField { .. } | Self::OutputWeight => target,
        }
    }
}

impl fmt::Display for TensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenEmbedding => f.write_str("tok_embeddings.weight"),
            Self::LayerField { layer, field } => write!(f, "layers.{layer}.{}", field.suffix()),
            Self::FinalNorm => f.write_str("norm.weight"),
            Self::RopeFreqs => f.write_str("rope.freqs"),
            Self::OutputWeight => f.write_str("output.weight"),
        }
    }
}

/// A plain decimal index: ASCII digits only, so `+1` or ` 1` are rejected.
pub(crate) fn parse_index(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// How slices of one tensor from successive shards combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAxis {
    /// Concatenate along the leading axis (row-parallel split).
    Rows,
    /// Concatenate along axis 1 (column-parallel split).
    Columns,
    /// Not split: keep the first shard's copy.
    Replicated,
}

impl MergeAxis {
    /// Axis rule for a tensor name and the rank of its slice.
    pub fn for_tensor(name: &str, rank: usize) -> Self {
        let column_split = name.starts_with("tok_embeddings.")
            || name.ends_with(".attention.wo.weight")
            || name.ends_with(".feed_forward.w2.weight");
        if rank < 2 {
            Self::Replicated
        } else if column_split {
            Self::Columns
        } else {
            Self::Rows
        }
    }
}
