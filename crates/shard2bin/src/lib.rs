//! Tensor-parallel checkpoint to flat inference binary converter.
//!
//! Reads Meta-style `consolidated.<N>.safetensors` shards plus `params.json`
//! and writes a single file with a fixed layout: a 28-byte header, the token
//! embeddings, one fixed-size block per transformer layer, the final norm, a
//! reserved (zeroed) rope region and the classifier weights. Matrices are
//! stored as F32, F16 or Q40 (4-bit blocks of 32 with an f16 scale).
//!
//! Shards are processed strictly in order, one at a time. Slices of the same
//! tensor from different shards are written at their absolute offsets as
//! they arrive: row splits are appended, column splits are scattered row by
//! row. Peak memory is one shard plus any column slices too narrow to hold
//! whole Q40 groups, which are buffered until their last shard arrives.
//!
//! # Example
//!
//! ```no_run
//! use shard2bin::{EncodingMode, convert_dir};
//! use std::path::Path;
//!
//! let report = convert_dir(Path::new("llama-2-7b"), Path::new("out.bin"), EncodingMode::Q40)?;
//! assert!(report.is_complete());
//! # Ok::<(), shard2bin::ConvertError>(())
//! ```

pub mod convert;
pub mod encode;
pub mod encoding;
pub mod error;
pub mod layout;
pub mod merge;
pub mod names;
pub mod params;
pub mod q40;
pub mod scheduler;
pub mod shard;

pub use convert::{ConversionReport, Converter, convert_dir, discover_hidden_dim};
pub use encode::encode;
pub use encoding::EncodingMode;
pub use error::{ConvertError, Result};
pub use layout::{BlockOffsetTable, FileLayout, ModelHeader};
pub use merge::{Merged, ShardMerger, concat};
pub use names::{BlockField, MergeAxis, TensorKind};
pub use params::{ModelParams, ParamsFile};
pub use q40::{dequantize_q40, quantize_q40};
pub use scheduler::{WriteOutcome, WriteProgress, WriteScheduler, WriteSummary};
pub use shard::{LogicalTensor, SafetensorsShard, Shard, ShardSource, discover_shards};
