//! Checkpoint shards: discovery, loading and the in-memory tensor type.

use crate::error::{ConvertError, Result};
use crate::names::parse_index;
use half::{bf16, f16};
use safetensors::{Dtype, SafeTensors};
use std::fs;
use std::path::{Path, PathBuf};

/// A named tensor with owned `f32` data in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl LogicalTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { name: name.into(), shape, data }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

/// All tensors of one shard.
#[derive(Debug, Clone, Default)]
pub struct Shard {
    pub label: String,
    pub tensors: Vec<LogicalTensor>,
}

impl Shard {
    pub fn new(label: impl Into<String>, tensors: Vec<LogicalTensor>) -> Self {
        Self { label: label.into(), tensors }
    }

    pub fn get(&self, name: &str) -> Option<&LogicalTensor> {
        self.tensors.iter().find(|t| t.name == name)
    }
}

/// Something that yields one shard, exactly once.
pub trait ShardSource {
    /// Human-readable identity for logs and errors.
    fn label(&self) -> String;

    fn load(self) -> Result<Shard>;
}

impl ShardSource for Shard {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn load(self) -> Result<Shard> {
        Ok(self)
    }
}

/// A `consolidated.<N>.safetensors` file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetensorsShard {
    pub path: PathBuf,
}

impl SafetensorsShard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ShardSource for SafetensorsShard {
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn load(self) -> Result<Shard> {
        let label = self.label();
        let buffer = fs::read(&self.path)?;
        let st = SafeTensors::deserialize(&buffer)
            .map_err(|e| ConvertError::shard(&label, format!("failed to deserialize: {e}")))?;

        let mut views = st.tensors();
        views.sort_by(|a, b| a.0.cmp(&b.0));

        let mut tensors = Vec::with_capacity(views.len());
        for (name, view) in views {
            let data = widen_to_f32(view.dtype(), view.data())
                .map_err(|reason| ConvertError::shard(&label, format!("{name}: {reason}")))?;
            tensors.push(LogicalTensor::new(name, view.shape().to_vec(), data));
        }
        tracing::debug!(shard = %label, tensors = tensors.len(), "loaded shard");
        Ok(Shard::new(label, tensors))
    }
}

/// Decode a little-endian safetensors payload into `f32`.
fn widen_to_f32(dtype: Dtype, data: &[u8]) -> std::result::Result<Vec<f32>, String> {
    match dtype {
        Dtype::F32 => match bytemuck::try_cast_slice::<u8, f32>(data) {
            Ok(xs) => Ok(xs.to_vec()),
            Err(_) => Ok(data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
        },
        Dtype::F16 => {
            Ok(data.chunks_exact(2).map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32()).collect())
        }
        Dtype::BF16 => {
            Ok(data.chunks_exact(2).map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32()).collect())
        }
        other => Err(format!("unsupported dtype {other:?}")),
    }
}

/// Find `consolidated.<N>.safetensors` shards in `dir`, ordered by `<N>`.
pub fn discover_shards(dir: &Path) -> Result<Vec<SafetensorsShard>> {
    let mut found: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(index) = path.file_name().and_then(|n| n.to_str()).and_then(shard_index) else {
            continue;
        };
        found.push((index, path));
    }
    if found.is_empty() {
        return Err(ConvertError::shard(
            dir.display().to_string(),
            "no consolidated.<N>.safetensors files found",
        ));
    }
    found.sort();
    Ok(found.into_iter().map(|(_, path)| SafetensorsShard::new(path)).collect())
}

fn shard_index(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("consolidated.")?
        .strip_suffix(".safetensors")
        .and_then(parse_index)
}
