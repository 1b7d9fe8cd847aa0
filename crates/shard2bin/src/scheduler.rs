//! Positioned writes and per-tensor progress tracking.
//!
//! Tensor-parallel weights arrive interleaved across shards, so writes land
//! at non-monotonic offsets. Each tensor owns a disjoint, precomputed region
//! of the file; the scheduler remembers how many bytes of each region are
//! filled and appends the next chunk right after them. Column bands are the
//! exception: their rows are placed at explicit offsets with
//! [`WriteScheduler::write_at`].

use crate::error::{ConvertError, Result};
use crate::layout::FileLayout;
use crate::names::TensorKind;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};

const ZERO_CHUNK: usize = 64 * 1024;

/// Progress of one tensor's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    InProgress(u64),
    Complete,
}

/// Result of a single [`WriteScheduler::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes written, region not yet full.
    Partial { written: u64, expected: u64 },
    /// This write filled the region exactly.
    Completed,
    /// The tensor was already complete; nothing was written.
    Skipped,
}

/// A tensor whose region was only partly filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteTensor {
    pub name: String,
    pub written: u64,
    pub expected: u64,
}

/// End-of-run state of every region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub completed: usize,
    pub incomplete: Vec<IncompleteTensor>,
    /// Expected tensors that never received a single write.
    pub missing: Vec<String>,
}

impl WriteSummary {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty() && self.missing.is_empty()
    }
}

/// Owns the output sink and the progress map for one conversion run.
#[derive(Debug)]
pub struct WriteScheduler<W> {
    sink: W,
    layout: FileLayout,
    progress: HashMap<TensorKind, WriteProgress>,
}

impl<W: Write + Seek> WriteScheduler<W> {
    /// Write the header and zero-fill the reserved rope region.
    pub fn new(mut sink: W, layout: FileLayout) -> Result<Self> {
        sink.seek(SeekFrom::Start(0))?;
        sink.write_all(&layout.header().to_bytes())?;

        sink.seek(SeekFrom::Start(layout.rope_offset()))?;
        let zeros = vec![0u8; ZERO_CHUNK];
        let mut left = layout.rope_bytes;
        while left > 0 {
            let n = left.min(ZERO_CHUNK as u64) as usize;
            sink.write_all(&zeros[..n])?;
            left -= n as u64;
        }

        Ok(Self { sink, layout, progress: HashMap::new() })
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    pub fn progress(&self, kind: TensorKind) -> Option<WriteProgress> {
        self.progress.get(&kind).copied()
    }

    /// Write the next chunk of the tensor called `name`.
    pub fn write(&mut self, name: &str, bytes: &[u8]) -> Result<WriteOutcome> {
        let kind = TensorKind::parse(name, self.layout.params.n_layers)?;
        self.write_kind(kind, bytes)
    }

    /// Write the next chunk of an already parsed tensor, right after the
    /// bytes it already holds.
    ///
    /// Fails with [`ConvertError::SizeOverflow`] before touching the sink if
    /// the chunk would run past the tensor's region.
    pub fn write_kind(&mut self, kind: TensorKind, bytes: &[u8]) -> Result<WriteOutcome> {
        let at = match self.progress.get(&kind) {
            Some(WriteProgress::InProgress(n)) => *n,
            _ => 0,
        };
        self.write_at(kind, at, bytes)
    }

    /// Write a chunk at `at` bytes into the tensor's region.
    ///
    /// Used for column bands, whose rows land at strided offsets. Progress
    /// still counts bytes, so the tensor completes once every byte of its
    /// region has been written exactly once.
    pub fn write_at(&mut self, kind: TensorKind, at: u64, bytes: &[u8]) -> Result<WriteOutcome> {
        let written = match self.progress.get(&kind) {
            Some(WriteProgress::Complete) => {
                tracing::debug!(tensor = %kind, "already complete, skipping");
                return Ok(WriteOutcome::Skipped);
            }
            Some(WriteProgress::InProgress(n)) => *n,
            None => 0,
        };

        if kind == TensorKind::RopeFreqs {
            self.progress.insert(kind, WriteProgress::Complete);
            tracing::debug!(tensor = %kind, "rope frequencies are not stored");
            return Ok(WriteOutcome::Completed);
        }

        let (start, expected) = self.layout.region(kind)?;
        let len = bytes.len() as u64;
        let after = written + len;
        if after > expected || at + len > expected {
            return Err(ConvertError::SizeOverflow {
                name: kind.to_string(),
                written: after.max(at + len),
                expected,
            });
        }

        self.sink.seek(SeekFrom::Start(start + at))?;
        self.sink.write_all(bytes)?;

        if after == expected {
            self.progress.insert(kind, WriteProgress::Complete);
            tracing::debug!(tensor = %kind, bytes = expected, "tensor complete");
            Ok(WriteOutcome::Completed)
        } else {
            self.progress.insert(kind, WriteProgress::InProgress(after));
            tracing::trace!(tensor = %kind, written = after, expected, "tensor in progress");
            Ok(WriteOutcome::Partial { written: after, expected })
        }
    }

    /// Flush the sink and report every region that is not complete.
    pub fn finish(mut self) -> Result<(W, WriteSummary)> {
        self.sink.flush()?;

        let mut summary = WriteSummary::default();
        for kind in self.layout.expected_tensors() {
            match self.progress.get(&kind) {
                Some(WriteProgress::Complete) => summary.completed += 1,
                Some(WriteProgress::InProgress(written)) => {
                    let (_, expected) = self.layout.region(kind)?;
                    tracing::warn!(
                        tensor = %kind,
                        written,
                        expected,
                        "tensor is not complete (missing or truncated shard?)"
                    );
                    summary.incomplete.push(IncompleteTensor {
                        name: kind.to_string(),
                        written: *written,
                        expected,
                    });
                }
                None => {
                    tracing::warn!(tensor = %kind, "tensor was never written");
                    summary.missing.push(kind.to_string());
                }
            }
        }
        Ok((self.sink, summary))
    }
}
