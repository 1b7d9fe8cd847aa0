//! On-disk layout of the output file.
//!
//! ```text
//! header (7 x i32 LE)
//! token embeddings      vocab_size * dim           F32
//! n_layers x block      see BlockOffsetTable
//! final norm            dim                        F32
//! rope reserved         max_seq_len * head_size    F32, zero-filled
//! output weights        vocab_size * dim           target encoding
//! ```
//!
//! Everything here is a pure function of [`ModelParams`] and the target
//! [`EncodingMode`].

use crate::encoding::EncodingMode;
use crate::error::{ConvertError, Result};
use crate::names::{BlockField, TensorKind};
use crate::params::ModelParams;
use std::io::Read;

/// Size of the file header in bytes.
pub const HEADER_BYTES: u64 = 28;

/// The seven header integers, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelHeader {
    pub dim: i32,
    pub hidden_dim: i32,
    pub n_layers: i32,
    pub n_heads: i32,
    pub n_kv_heads: i32,
    pub vocab_size: i32,
    pub max_seq_len: i32,
}

impl ModelHeader {
    /// Header for validated params. Values were checked to fit in `i32`.
    pub fn from_params(p: &ModelParams) -> Self {
        Self {
            dim: p.dim as i32,
            hidden_dim: p.hidden_dim as i32,
            n_layers: p.n_layers as i32,
            n_heads: p.n_heads as i32,
            n_kv_heads: p.n_kv_heads as i32,
            vocab_size: p.vocab_size as i32,
            max_seq_len: p.max_seq_len as i32,
        }
    }

    fn fields(&self) -> [i32; 7] {
        [
            self.dim,
            self.hidden_dim,
            self.n_layers,
            self.n_heads,
            self.n_kv_heads,
            self.vocab_size,
            self.max_seq_len,
        ]
    }

    pub fn to_bytes(&self) -> [u8; HEADER_BYTES as usize] {
        let mut out = [0u8; HEADER_BYTES as usize];
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.fields()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_BYTES as usize]) -> Self {
        let mut v = [0i32; 7];
        for (slot, chunk) in v.iter_mut().zip(bytes.chunks_exact(4)) {
            *slot = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self {
            dim: v[0],
            hidden_dim: v[1],
            n_layers: v[2],
            n_heads: v[3],
            n_kv_heads: v[4],
            vocab_size: v[5],
            max_seq_len: v[6],
        }
    }

    /// Read the header from the start of a converted file.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_BYTES as usize];
        r.read_exact(&mut buf)?;
        Ok(Self::from_bytes(&buf))
    }
}

/// Size and in-block offset of one layer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    pub bytes: u64,
    pub offset: u64,
}

/// Per-layer block layout for one (params, encoding) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOffsetTable {
    slots: [FieldSlot; 9],
    total: u64,
}

impl BlockOffsetTable {
    pub fn new(params: &ModelParams, encoding: EncodingMode) -> Result<Self> {
        let dim = u64::from(params.dim);
        let hidden = u64::from(params.hidden_dim);
        let kv_dim = params.kv_dim();

        let mut slots = [FieldSlot { bytes: 0, offset: 0 }; 9];
        let mut total = 0u64;
        for (slot, field) in slots.iter_mut().zip(BlockField::ALL) {
            let (n, enc) = match field {
                BlockField::AttentionNorm | BlockField::FfnNorm => (dim, EncodingMode::F32),
                BlockField::Wq | BlockField::Wo => (dim * dim, encoding),
                BlockField::Wk | BlockField::Wv => (dim * kv_dim, encoding),
                BlockField::W1 | BlockField::W2 | BlockField::W3 => (dim * hidden, encoding),
            };
            let bytes = enc.size_of(n)?;
            *slot = FieldSlot { bytes, offset: total };
            total += bytes;
        }
        Ok(Self { slots, total })
    }

    pub fn slot(&self, field: BlockField) -> FieldSlot {
        self.slots[field as usize]
    }

    /// Bytes occupied by one layer.
    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Global offsets of every region of the output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    pub params: ModelParams,
    pub encoding: EncodingMode,
    pub block: BlockOffsetTable,
    pub token_embedding_bytes: u64,
    pub final_norm_bytes: u64,
    pub rope_bytes: u64,
    pub output_bytes: u64,
}

impl FileLayout {
    pub fn plan(params: &ModelParams, encoding: EncodingMode) -> Result<Self> {
        params.validate()?;
        let dim = u64::from(params.dim);
        let vocab = u64::from(params.vocab_size);
        // two f32 tables of max_seq_len * head_size / 2 each
        let rope_values = u64::from(params.max_seq_len) * params.head_size();

        Ok(Self {
            params: *params,
            encoding,
            block: BlockOffsetTable::new(params, encoding)?,
            token_embedding_bytes: EncodingMode::F32.size_of(vocab * dim)?,
            final_norm_bytes: EncodingMode::F32.size_of(dim)?,
            rope_bytes: EncodingMode::F32.size_of(rope_values)?,
            output_bytes: encoding.size_of(vocab * dim)?,
        })
    }

    pub fn header(&self) -> ModelHeader {
        ModelHeader::from_params(&self.params)
    }

    pub fn blocks_offset(&self) -> u64 {
        HEADER_BYTES + self.token_embedding_bytes
    }

    pub fn after_blocks_offset(&self) -> u64 {
        self.blocks_offset() + self.block.total() * u64::from(self.params.n_layers)
    }

    pub fn rope_offset(&self) -> u64 {
        self.after_blocks_offset() + self.final_norm_bytes
    }

    pub fn output_offset(&self) -> u64 {
        self.rope_offset() + self.rope_bytes
    }

    /// Total size of a fully written file.
    pub fn file_size(&self) -> u64 {
        self.output_offset() + self.output_bytes
    }

    /// Absolute start offset and byte size of a tensor's region.
    ///
    /// `rope.freqs` maps to the reserved region; nothing is ever written there.
    pub fn region(&self, kind: TensorKind) -> Result<(u64, u64)> {
        let region = match kind {
            TensorKind::TokenEmbedding => (HEADER_BYTES, self.token_embedding_bytes),
            TensorKind::LayerField { layer, field } => {
                if layer >= self.params.n_layers {
                    return Err(ConvertError::UnknownTensor(kind.to_string()));
                }
                let slot = self.block.slot(field);
                let block_start = self.blocks_offset() + self.block.total() * u64::from(layer);
                let start = block_start + slot.offset;
                (start, slot.bytes)
            }
            TensorKind::FinalNorm => (self.after_blocks_offset(), self.final_norm_bytes),
            TensorKind::RopeFreqs => (self.rope_offset(), self.rope_bytes),
            TensorKind::OutputWeight => (self.output_offset(), self.output_bytes),
        };
        Ok(region)
    }

    /// Every tensor that must be written for the file to be complete.
    pub fn expected_tensors(&self) -> impl Iterator<Item = TensorKind> + '_ {
        let layers = (0..self.params.n_layers).flat_map(|layer| {
            BlockField::ALL.into_iter().map(move |field| TensorKind::LayerField { layer, field })
        });
        std::iter::once(TensorKind::TokenEmbedding)
            .chain(layers)
            .chain([TensorKind::FinalNorm, TensorKind::OutputWeight])
    }
}
