//! Model hyperparameters and `params.json` loading.

use crate::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Context length written to the header when `params.json` does not carry one.
pub const DEFAULT_MAX_SEQ_LEN: u32 = 2048;

/// Hyperparameters as they appear in `params.json`.
///
/// Both Meta-style and HF-style key names are accepted. A `hidden_dim` key is
/// ignored; the width is rediscovered from the first shard.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamsFile {
    #[serde(alias = "hidden_size")]
    pub dim: u32,
    #[serde(alias = "num_hidden_layers")]
    pub n_layers: u32,
    #[serde(alias = "num_attention_heads")]
    pub n_heads: u32,
    #[serde(default, alias = "num_key_value_heads")]
    pub n_kv_heads: Option<u32>,
    pub vocab_size: i64,
    #[serde(default)]
    pub max_seq_len: Option<u32>,
}

impl ParamsFile {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ConvertError::config(format!("params.json: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| ConvertError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}

/// Validated hyperparameters for a conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelParams {
    pub dim: u32,
    pub hidden_dim: u32,
    pub n_layers: u32,
    pub n_heads: u32,
    pub n_kv_heads: u32,
    pub vocab_size: u32,
    pub max_seq_len: u32,
}

impl ModelParams {
    /// Validate a parsed params file and fix the discovered `hidden_dim`.
    pub fn resolve(file: &ParamsFile, hidden_dim: u32) -> Result<Self> {
        if file.vocab_size < 1 {
            return Err(ConvertError::config(format!(
                "vocab_size must be at least 1, got {}",
                file.vocab_size
            )));
        }
        let vocab_size = u32::try_from(file.vocab_size)
            .map_err(|_| {
                ConvertError::config(format!("vocab_size {} is too large", file.vocab_size))
            })?;

        let params = Self {
            dim: file.dim,
            hidden_dim,
            n_layers: file.n_layers,
            n_heads: file.n_heads,
            n_kv_heads: file.n_kv_heads.unwrap_or(file.n_heads),
            vocab_size,
            max_seq_len: file.max_seq_len.unwrap_or(DEFAULT_MAX_SEQ_LEN),
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the invariants the layout relies on.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("dim", self.dim),
            ("hidden_dim", self.hidden_dim),
            ("n_layers", self.n_layers),
            ("n_heads", self.n_heads),
            ("n_kv_heads", self.n_kv_heads),
            ("vocab_size", self.vocab_size),
            ("max_seq_len", self.max_seq_len),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConvertError::config(format!("{name} must be positive")));
            }
            // header fields are signed 32-bit
            if value > i32::MAX as u32 {
                return Err(ConvertError::config(format!("{name} = {value} does not fit in i32")));
            }
        }
        if self.dim % self.n_heads != 0 {
            return Err(ConvertError::config(format!(
                "dim {} is not divisible by n_heads {}",
                self.dim, self.n_heads
            )));
        }
        Ok(())
    }

    pub fn head_size(&self) -> u64 {
        u64::from(self.dim / self.n_heads)
    }

    /// Always integral: `dim` is a multiple of `n_heads` after validation.
    pub fn kv_dim(&self) -> u64 {
        u64::from(self.dim) * u64::from(self.n_kv_heads) / u64::from(self.n_heads)
    }
}
