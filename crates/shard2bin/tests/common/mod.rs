//! Shared fixtures: tiny Llama-shaped checkpoints, whole or split.

#![allow(dead_code)]

use safetensors::Dtype;
use safetensors::tensor::{TensorView, serialize_to_file};
use shard2bin::{LogicalTensor, MergeAxis, ParamsFile, Shard};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy)]
pub struct TinyModel {
    pub dim: usize,
    pub hidden_dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub vocab_size: usize,
}

impl TinyModel {
    pub const SMALL: Self =
        Self { dim: 8, hidden_dim: 16, n_layers: 1, n_heads: 2, n_kv_heads: 2, vocab_size: 4 };

    pub fn params_json(&self) -> String {
        format!(
            r#"{{"dim": {}, "n_layers": {}, "n_heads": {}, "n_kv_heads": {}, "vocab_size": {},
                "multiple_of": 32, "norm_eps": 1e-05}}"#,
            self.dim, self.n_layers, self.n_heads, self.n_kv_heads, self.vocab_size
        )
    }

    pub fn params_file(&self) -> ParamsFile {
        ParamsFile::from_json(&self.params_json()).unwrap()
    }

    /// Every tensor of an unsplit checkpoint, with distinct values.
    pub fn tensors(&self) -> Vec<LogicalTensor> {
        let d = self.dim;
        let h = self.hidden_dim;
        let kv = d * self.n_kv_heads / self.n_heads;
        let head = d / self.n_heads;

        let mut specs: Vec<(String, Vec<usize>)> = vec![
            ("tok_embeddings.weight".into(), vec![self.vocab_size, d]),
            ("norm.weight".into(), vec![d]),
            ("output.weight".into(), vec![self.vocab_size, d]),
            ("rope.freqs".into(), vec![head / 2]),
        ];
        for l in 0..self.n_layers {
            let p = format!("layers.{l}");
            specs.extend([
                (format!("{p}.attention_norm.weight"), vec![d]),
                (format!("{p}.ffn_norm.weight"), vec![d]),
                (format!("{p}.attention.wq.weight"), vec![d, d]),
                (format!("{p}.attention.wk.weight"), vec![kv, d]),
                (format!("{p}.attention.wv.weight"), vec![kv, d]),
                (format!("{p}.attention.wo.weight"), vec![d, d]),
                (format!("{p}.feed_forward.w1.weight"), vec![h, d]),
                (format!("{p}.feed_forward.w2.weight"), vec![d, h]),
                (format!("{p}.feed_forward.w3.weight"), vec![h, d]),
            ]);
        }

        specs
            .into_iter()
            .enumerate()
            .map(|(t, (name, shape))| {
                let n: usize = shape.iter().product();
                let data = (0..n).map(|i| t as f32 + (i as f32 * 0.37).sin()).collect();
                LogicalTensor::new(name, shape, data)
            })
            .collect()
    }

    pub fn single_shard(&self) -> Shard {
        Shard::new("consolidated.00", self.tensors())
    }

    /// Split every tensor the way a two-way tensor-parallel run would.
    pub fn two_shards(&self) -> Vec<Shard> {
        let mut a = Vec::new();
        let mut b = Vec::new();
        for t in self.tensors() {
            let (x, y) = split_in_two(&t);
            a.push(x);
            b.push(y);
        }
        vec![Shard::new("consolidated.00", a), Shard::new("consolidated.01", b)]
    }
}

pub fn split_in_two(t: &LogicalTensor) -> (LogicalTensor, LogicalTensor) {
    match MergeAxis::for_tensor(&t.name, t.rank()) {
        MergeAxis::Replicated => (t.clone(), t.clone()),
        MergeAxis::Rows => {
            let half_rows = t.shape[0] / 2;
            let cut = half_rows * t.shape[1];
            let shape = vec![half_rows, t.shape[1]];
            (
                LogicalTensor::new(t.name.clone(), shape.clone(), t.data[..cut].to_vec()),
                LogicalTensor::new(t.name.clone(), shape, t.data[cut..].to_vec()),
            )
        }
        MergeAxis::Columns => {
            let cols = t.shape[1];
            let half = cols / 2;
            let mut left = Vec::new();
            let mut right = Vec::new();
            for row in t.data.chunks(cols) {
                left.extend_from_slice(&row[..half]);
                right.extend_from_slice(&row[half..]);
            }
            let shape = vec![t.shape[0], half];
            (
                LogicalTensor::new(t.name.clone(), shape.clone(), left),
                LogicalTensor::new(t.name.clone(), shape, right),
            )
        }
    }
}

/// Write a shard as an F32 safetensors file.
pub fn write_safetensors(path: &Path, tensors: &[LogicalTensor]) {
    let payloads: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|t| {
            let bytes = t.data.iter().flat_map(|v| v.to_le_bytes()).collect();
            (t.name.clone(), t.shape.clone(), bytes)
        })
        .collect();
    let views: HashMap<String, TensorView<'_>> = payloads
        .iter()
        .map(|(name, shape, bytes)| {
            (name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap())
        })
        .collect();
    serialize_to_file(&views, None, path).unwrap();
}

/// Lay out a model directory: params.json plus consolidated shards.
pub fn write_model_dir(dir: &Path, model: &TinyModel, shards: &[Shard]) {
    std::fs::write(dir.join("params.json"), model.params_json()).unwrap();
    for (i, shard) in shards.iter().enumerate() {
        write_safetensors(&dir.join(format!("consolidated.{i:02}.safetensors")), &shard.tensors);
    }
}
