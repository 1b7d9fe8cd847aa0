//! The sequential shard loop.
//!
//! Shards are loaded one at a time and consumed tensor by tensor. Nothing is
//! created on disk until the parameters have been validated and the layout
//! planned.

use crate::encode::encode;
use crate::encoding::EncodingMode;
use crate::error::{ConvertError, Result};
use crate::layout::FileLayout;
use crate::merge::{Merged, ShardMerger};
use crate::names::TensorKind;
use crate::params::{ModelParams, ParamsFile};
use crate::scheduler::{WriteScheduler, WriteSummary};
use crate::shard::{LogicalTensor, Shard, ShardSource, discover_shards};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

/// Tensor whose first dimension reveals the feed-forward width.
const HIDDEN_DIM_SOURCE: &str = "layers.0.feed_forward.w1.weight";

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub params: ModelParams,
    pub encoding: EncodingMode,
    pub shard_count: usize,
    pub file_size: u64,
    #[serde(flatten)]
    pub summary: WriteSummary,
    /// Column-split tensors that never received all their slices.
    pub unmerged: Vec<(String, usize)>,
}

impl ConversionReport {
    pub fn is_complete(&self) -> bool {
        self.summary.is_complete() && self.unmerged.is_empty()
    }
}

/// Converts an ordered list of shards into one output file.
#[derive(Debug, Clone)]
pub struct Converter {
    params: ParamsFile,
    encoding: EncodingMode,
}

impl Converter {
    pub fn new(params: ParamsFile, encoding: EncodingMode) -> Self {
        Self { params, encoding }
    }

    /// Run the conversion into `sink`, consuming `shards` in order.
    pub fn run<S, W>(&self, shards: Vec<S>, sink: W) -> Result<(W, ConversionReport)>
    where
        S: ShardSource,
        W: Write + Seek,
    {
        self.run_with(shards, |_| Ok(sink))
    }

    /// Like [`Converter::run`], but the sink is only opened once the layout
    /// has been planned, so invalid parameters never create or truncate it.
    pub fn run_with<S, W, F>(&self, shards: Vec<S>, open: F) -> Result<(W, ConversionReport)>
    where
        S: ShardSource,
        W: Write + Seek,
        F: FnOnce(&FileLayout) -> Result<W>,
    {
        let shard_count = shards.len();
        let mut sources = shards.into_iter();
        let first = sources
            .next()
            .ok_or_else(|| ConvertError::shard("<input>", "no shards to convert"))?;

        tracing::info!(shard = %first.label(), index = 0, of = shard_count, "loading shard");
        let first = first.load()?;

        let hidden_dim = discover_hidden_dim(&first, shard_count)?;
        let params = ModelParams::resolve(&self.params, hidden_dim)?;
        let layout = FileLayout::plan(&params, self.encoding)?;
        tracing::info!(
            ?params,
            encoding = %self.encoding,
            block_bytes = layout.block.total(),
            file_bytes = layout.file_size(),
            "planned layout"
        );
        let file_size = layout.file_size();

        let sink = open(&layout)?;
        let mut merger = ShardMerger::new(shard_count);
        let mut scheduler = WriteScheduler::new(sink, layout)?;
        self.ingest(first, &mut merger, &mut scheduler)?;

        for (index, source) in sources.enumerate() {
            let label = source.label();
            tracing::info!(shard = %label, index = index + 1, of = shard_count, "loading shard");
            let shard = source.load()?;
            self.ingest(shard, &mut merger, &mut scheduler)?;
        }

        let unmerged = merger.pending();
        for (name, slices) in &unmerged {
            tracing::warn!(tensor = %name, slices, expected = shard_count, "slices never merged");
        }

        let (sink, summary) = scheduler.finish()?;
        let report = ConversionReport {
            params,
            encoding: self.encoding,
            shard_count,
            file_size,
            summary,
            unmerged,
        };
        Ok((sink, report))
    }

    fn ingest<W: Write + Seek>(
        &self,
        shard: Shard,
        merger: &mut ShardMerger,
        scheduler: &mut WriteScheduler<W>,
    ) -> Result<()> {
        let n_layers = scheduler.layout().params.n_layers;
        for tensor in shard.tensors {
            let kind = TensorKind::parse(&tensor.name, n_layers)?;
            if kind == TensorKind::RopeFreqs {
                scheduler.write_kind(kind, &[])?;
                continue;
            }

            let encoding = kind.encoding(self.encoding);
            let Some(ready) = merger.merge(tensor, encoding.column_alignment())? else {
                continue;
            };
            tracing::info!(tensor = %kind, shape = ?ready.tensor().shape, %encoding, "exporting");
            match ready {
                Merged::Append(t) => {
                    let bytes = encode(&t.data, encoding)?;
                    drop(t);
                    scheduler.write_kind(kind, &bytes)?;
                }
                Merged::ColumnBand { slice, index, parts } => {
                    write_band(scheduler, kind, encoding, &slice, index, parts)?;
                }
            }
        }
        tracing::debug!(buffered_values = merger.buffered_values(), "shard consumed");
        Ok(())
    }
}

/// Scatter the rows of one column band into the tensor's region.
fn write_band<W: Write + Seek>(
    scheduler: &mut WriteScheduler<W>,
    kind: TensorKind,
    encoding: EncodingMode,
    band: &LogicalTensor,
    index: usize,
    parts: usize,
) -> Result<()> {
    let rows = band.shape[0].max(1);
    let width = (band.numel() / rows) as u64;
    let full_width = width * parts as u64;
    let bytes = encode(&band.data, encoding)?;
    let row_bytes = encoding.size_of(width)?;
    if row_bytes == 0 {
        return Ok(());
    }
    for (row, chunk) in bytes.chunks(row_bytes as usize).enumerate() {
        let at = encoding.size_of(row as u64 * full_width + index as u64 * width)?;
        scheduler.write_at(kind, at, chunk)?;
    }
    Ok(())
}

/// Feed-forward width of the whole model, from the first shard.
///
/// `w1` is split by rows, so each shard holds `hidden_dim / shard_count` rows.
pub fn discover_hidden_dim(first: &Shard, shard_count: usize) -> Result<u32> {
    let w1 = first.get(HIDDEN_DIM_SOURCE).ok_or_else(|| {
        ConvertError::config(format!("first shard {} has no {HIDDEN_DIM_SOURCE}", first.label))
    })?;
    let rows = match w1.shape.as_slice() {
        [rows, _, ..] => *rows,
        other => {
            return Err(ConvertError::config(format!(
                "{HIDDEN_DIM_SOURCE} has shape {other:?}, expected a matrix"
            )));
        }
    };
    u32::try_from(rows * shard_count.max(1))
        .map_err(|_| ConvertError::config(format!("hidden_dim {rows} x {shard_count} overflows")))
}

/// Convert `model_dir` (params.json + consolidated shards) into `output`.
///
/// `output` is created only after the parameters are validated and the
/// layout is planned. On a later failure the partially written file is left
/// in place.
pub fn convert_dir(
    model_dir: &Path,
    output: &Path,
    encoding: EncodingMode,
) -> Result<ConversionReport> {
    let params = ParamsFile::load(&model_dir.join("params.json"))?;
    let shards = discover_shards(model_dir)?;
    tracing::info!(dir = %model_dir.display(), shards = shards.len(), "found shards");

    let open = |_: &FileLayout| -> Result<BufWriter<File>> {
        Ok(BufWriter::new(File::create(output)?))
    };
    let (_, report) = Converter::new(params, encoding).run_with(shards, open)?;
    Ok(report)
}
