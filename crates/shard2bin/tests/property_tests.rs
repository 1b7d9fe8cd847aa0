//! Property-based tests for `shard2bin`.
//!
//! Covers encoding sizes, Q40 error bounds, layout arithmetic, slice merging
//! and the write scheduler's progress accounting.

use proptest::prelude::*;
use shard2bin::{
    BlockField, BlockOffsetTable, EncodingMode, FileLayout, LogicalTensor, MergeAxis, ModelParams,
    TensorKind, WriteOutcome, WriteProgress, WriteScheduler, concat, dequantize_q40, encode,
    quantize_q40,
};
use std::io::Cursor;

// ── Strategies ──────────────────────────────────────────────────────────────

fn arb_encoding() -> impl Strategy<Value = EncodingMode> {
    prop_oneof![Just(EncodingMode::F32), Just(EncodingMode::F16), Just(EncodingMode::Q40)]
}

/// Whole Q40 groups of bounded values.
fn arb_groups() -> impl Strategy<Value = Vec<f32>> {
    (1usize..=6).prop_flat_map(|groups| prop::collection::vec(-100.0f32..100.0, groups * 32))
}

/// Params whose every matrix is a whole number of Q40 groups.
fn arb_params() -> impl Strategy<Value = ModelParams> {
    (1u32..=4, 1u32..=4, 1u32..=3, 1u32..=8, 1u32..=4, 1u32..=64).prop_flat_map(
        |(heads, dim_mul, hidden_mul, n_layers, vocab, max_seq_len)| {
            (1u32..=heads).prop_map(move |kv_heads| ModelParams {
                dim: 32 * heads * dim_mul,
                hidden_dim: 32 * hidden_mul,
                n_layers,
                n_heads: heads,
                n_kv_heads: kv_heads,
                vocab_size: vocab,
                max_seq_len,
            })
        },
    )
}

/// A chunking of `total` bytes into non-empty pieces.
fn chunk_sizes(total: usize, cuts: &[usize]) -> Vec<usize> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % total).filter(|&c| c > 0).collect();
    points.push(0);
    points.push(total);
    points.sort_unstable();
    points.dedup();
    points.windows(2).map(|w| w[1] - w[0]).collect()
}

// ── Property tests ───────────────────────────────────────────────────────────

proptest! {
    /// The planned size of a tensor equals the length of its encoding.
    #[test]
    fn size_of_matches_encoded_length(values in arb_groups(), encoding in arb_encoding()) {
        let bytes = encode(&values, encoding).unwrap();
        prop_assert_eq!(bytes.len() as u64, encoding.size_of(values.len() as u64).unwrap());
    }

    /// Dequantized values stay within one quantization step of the input.
    #[test]
    fn q40_error_is_bounded(values in arb_groups()) {
        let decoded = dequantize_q40(&quantize_q40(&values).unwrap()).unwrap();
        prop_assert_eq!(decoded.len(), values.len());
        for (group, original) in decoded.chunks(32).zip(values.chunks(32)) {
            let abs_max = original.iter().fold(0f32, |m, v| m.max(v.abs()));
            let step = abs_max / 8.0;
            for (d, o) in group.iter().zip(original) {
                prop_assert!((d - o).abs() <= step * 1.01 + 1e-3, "{} vs {}", d, o);
            }
        }
    }

    /// Fields are packed back to back and the block total is their sum.
    #[test]
    fn block_fields_are_contiguous(params in arb_params(), encoding in arb_encoding()) {
        let table = BlockOffsetTable::new(&params, encoding).unwrap();
        let mut next = 0;
        for field in BlockField::ALL {
            let slot = table.slot(field);
            prop_assert_eq!(slot.offset, next);
            prop_assert!(slot.bytes > 0);
            next += slot.bytes;
        }
        prop_assert_eq!(next, table.total());
        prop_assert_eq!(&table, &BlockOffsetTable::new(&params, encoding).unwrap());
    }

    /// Expected regions tile the file between the header and the end, leaving
    /// only the rope region uncovered.
    #[test]
    fn regions_tile_the_file(params in arb_params(), encoding in arb_encoding()) {
        let layout = FileLayout::plan(&params, encoding).unwrap();
        let mut regions: Vec<(u64, u64)> = layout
            .expected_tensors()
            .chain(std::iter::once(TensorKind::RopeFreqs))
            .map(|kind| layout.region(kind).unwrap())
            .collect();
        regions.sort_unstable();
        let mut cursor = 28;
        for (start, size) in regions {
            prop_assert_eq!(start, cursor);
            cursor += size;
        }
        prop_assert_eq!(cursor, layout.file_size());
    }

    /// Layer tensor names survive a parse/display round trip.
    #[test]
    fn layer_names_round_trip(layer in 0u32..40, field in 0usize..9) {
        let kind = TensorKind::LayerField { layer, field: BlockField::ALL[field] };
        let name = kind.to_string();
        prop_assert_eq!(TensorKind::parse(&name, 40).unwrap(), kind);
        prop_assert!(TensorKind::parse(&name, layer).is_err());
    }

    /// Splitting a matrix into slices and concatenating them restores it.
    #[test]
    fn concat_inverts_a_split(
        rows in 1usize..6,
        cols in 1usize..6,
        parts in 1usize..4,
        by_rows in any::<bool>(),
    ) {
        let (r, c) = if by_rows { (rows * parts, cols) } else { (rows, cols * parts) };
        let data: Vec<f32> = (0..r * c).map(|i| i as f32).collect();
        let whole = LogicalTensor::new("w", vec![r, c], data.clone());

        let slices: Vec<LogicalTensor> = (0..parts)
            .map(|p| {
                if by_rows {
                    let n = rows * c;
                    LogicalTensor::new("w", vec![rows, c], data[p * n..(p + 1) * n].to_vec())
                } else {
                    let piece = data
                        .chunks(c)
                        .flat_map(|row| row[p * cols..(p + 1) * cols].to_vec())
                        .collect();
                    LogicalTensor::new("w", vec![r, cols], piece)
                }
            })
            .collect();

        let axis = if by_rows { MergeAxis::Rows } else { MergeAxis::Columns };
        prop_assert_eq!(concat(slices, axis).unwrap(), whole);
    }

    /// Progress grows with every chunk, never passes the region size, and the
    /// final chunk completes the tensor.
    #[test]
    fn progress_is_monotonic(cuts in prop::collection::vec(any::<usize>(), 0..8)) {
        let params = ModelParams {
            dim: 32,
            hidden_dim: 64,
            n_layers: 2,
            n_heads: 4,
            n_kv_heads: 2,
            vocab_size: 3,
            max_seq_len: 4,
        };
        let layout = FileLayout::plan(&params, EncodingMode::F16).unwrap();
        let kind = TensorKind::LayerField { layer: 1, field: BlockField::W2 };
        let (_, expected) = layout.region(kind).unwrap();
        let mut scheduler = WriteScheduler::new(Cursor::new(Vec::new()), layout).unwrap();

        let chunks = chunk_sizes(expected as usize, &cuts);
        let mut previous = 0;
        for (i, len) in chunks.iter().enumerate() {
            let outcome = scheduler.write_kind(kind, &vec![0xAB; *len]).unwrap();
            if i + 1 == chunks.len() {
                prop_assert_eq!(outcome, WriteOutcome::Completed);
                prop_assert_eq!(scheduler.progress(kind), Some(WriteProgress::Complete));
            } else {
                let WriteOutcome::Partial { written, expected: e } = outcome else {
                    return Err(TestCaseError::fail(format!("unexpected {outcome:?}")));
                };
                prop_assert!(written > previous);
                prop_assert!(written < e);
                previous = written;
            }
        }
        prop_assert_eq!(scheduler.write_kind(kind, &[1]).unwrap(), WriteOutcome::Skipped);
    }
}
