//! Folding tensor-parallel slices into logical tensors.
//!
//! Slices arrive shard by shard. What the merger hands back for writing
//! depends on the split axis:
//!
//! - [`MergeAxis::Rows`]: a row-major append, so each slice is released as
//!   soon as it arrives and lands right after the previous one;
//! - [`MergeAxis::Columns`]: each slice is released as a [`Merged::ColumnBand`]
//!   whose rows the caller places at strided offsets. When the band width is
//!   not a multiple of the required alignment (a Q40 group), slices are
//!   buffered until every shard has contributed and concatenated once;
//! - [`MergeAxis::Replicated`]: the first copy is released, later ones are
//!   dropped.

use crate::error::{ConvertError, Result};
use crate::names::MergeAxis;
use crate::shard::LogicalTensor;
use std::collections::{HashMap, HashSet};

/// Concatenate slices of one tensor along `axis`.
///
/// Slices must agree on every dimension except the concatenation axis.
/// `Replicated` keeps the first slice. Consumes the slices.
pub fn concat(mut slices: Vec<LogicalTensor>, axis: MergeAxis) -> Result<LogicalTensor> {
    if slices.is_empty() {
        return Err(ConvertError::ShapeMismatch {
            name: String::new(),
            detail: "no slices to merge".to_string(),
        });
    }
    if slices.len() == 1 || axis == MergeAxis::Replicated {
        return Ok(slices.swap_remove(0));
    }

    let dim = match axis {
        MergeAxis::Rows => 0,
        _ => 1,
    };
    let first_shape = slices[0].shape.clone();
    let name = slices[0].name.clone();
    for s in &slices {
        let agrees = s.rank() == first_shape.len()
            && s.rank() > dim
            && s.shape.iter().zip(&first_shape).enumerate().all(|(i, (a, b))| i == dim || a == b);
        if !agrees {
            return Err(ConvertError::ShapeMismatch {
                name,
                detail: format!("{:?} vs {:?} along axis {dim}", s.shape, first_shape),
            });
        }
    }

    let mut shape = first_shape;
    shape[dim] = slices.iter().map(|s| s.shape[dim]).sum();
    let total: usize = slices.iter().map(|s| s.numel()).sum();
    let mut data = Vec::with_capacity(total);

    match axis {
        MergeAxis::Rows => {
            for s in slices {
                data.extend_from_slice(&s.data);
            }
        }
        _ => {
            let outer = shape[0];
            let widths: Vec<usize> = slices.iter().map(|s| s.numel() / outer.max(1)).collect();
            for row in 0..outer {
                for (s, &w) in slices.iter().zip(&widths) {
                    data.extend_from_slice(&s.data[row * w..(row + 1) * w]);
                }
            }
        }
    }

    Ok(LogicalTensor { name, shape, data })
}

/// A slice ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub enum Merged {
    /// Contiguous data that follows whatever the tensor already holds.
    Append(LogicalTensor),
    /// Columns `[index * w, (index + 1) * w)` of a tensor split into `parts`
    /// equal bands of width `w` along axis 1.
    ColumnBand { slice: LogicalTensor, index: usize, parts: usize },
}

impl Merged {
    pub fn tensor(&self) -> &LogicalTensor {
        match self {
            Self::Append(t) | Self::ColumnBand { slice: t, .. } => t,
        }
    }
}

#[derive(Debug)]
struct BandState {
    shape: Vec<usize>,
    seen: usize,
}

/// Running merge state for one conversion run.
#[derive(Debug)]
pub struct ShardMerger {
    shard_count: usize,
    bands: HashMap<String, BandState>,
    buffered: HashMap<String, Vec<LogicalTensor>>,
    replicated: HashSet<String>,
}

impl ShardMerger {
    pub fn new(shard_count: usize) -> Self {
        Self {
            shard_count,
            bands: HashMap::new(),
            buffered: HashMap::new(),
            replicated: HashSet::new(),
        }
    }

    /// Fold one slice in. Returns the data that is ready to be written, if any.
    ///
    /// `align` is the number of values a column band must be a multiple of
    /// to be written on its own: 1 for F32/F16, the group size for Q40.
    pub fn merge(&mut self, slice: LogicalTensor, align: usize) -> Result<Option<Merged>> {
        match MergeAxis::for_tensor(&slice.name, slice.rank()) {
            MergeAxis::Rows => Ok(Some(Merged::Append(slice))),
            MergeAxis::Replicated => {
                if self.replicated.insert(slice.name.clone()) {
                    Ok(Some(Merged::Append(slice)))
                } else {
                    tracing::trace!(tensor = %slice.name, "dropping replicated copy");
                    Ok(None)
                }
            }
            MergeAxis::Columns if self.shard_count <= 1 => Ok(Some(Merged::Append(slice))),
            MergeAxis::Columns => {
                let width = slice.numel() / slice.shape[0].max(1);
                if width % align.max(1) == 0 && !self.buffered.contains_key(&slice.name) {
                    self.band(slice).map(Some)
                } else {
                    self.buffer(slice)
                }
            }
        }
    }

    fn band(&mut self, slice: LogicalTensor) -> Result<Merged> {
        let state = self
            .bands
            .entry(slice.name.clone())
            .or_insert_with(|| BandState { shape: slice.shape.clone(), seen: 0 });
        if state.shape != slice.shape {
            return Err(ConvertError::ShapeMismatch {
                name: slice.name,
                detail: format!("band {:?} vs {:?}", slice.shape, state.shape),
            });
        }
        let index = state.seen;
        state.seen += 1;
        if state.seen == self.shard_count {
            self.bands.remove(&slice.name);
        }
        Ok(Merged::ColumnBand { slice, index, parts: self.shard_count })
    }

    fn buffer(&mut self, slice: LogicalTensor) -> Result<Option<Merged>> {
        let name = slice.name.clone();
        let buffered = self.buffered.entry(name.clone()).or_default();
        buffered.push(slice);
        if buffered.len() < self.shard_count {
            return Ok(None);
        }
        let slices = self.buffered.remove(&name).unwrap_or_default();
        concat(slices, MergeAxis::Columns).map(|t| Some(Merged::Append(t)))
    }

    /// Column-split names still waiting for slices, with how many arrived.
    pub fn pending(&self) -> Vec<(String, usize)> {
        let bands = self.bands.iter().map(|(name, b)| (name.clone(), b.seen));
        let buffered = self.buffered.iter().map(|(name, slices)| (name.clone(), slices.len()));
        let mut out: Vec<_> = bands.chain(buffered).collect();
        out.sort();
        out
    }

    /// Values currently held back in column buffers.
    pub fn buffered_values(&self) -> usize {
        self.buffered.values().flatten().map(LogicalTensor::numel).sum()
    }
}
