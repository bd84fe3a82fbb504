//! Table-level permutation of ragged batches.
//!
//! A permutation maps output table slot `t` to source table `permute[t]`. Rows
//! keep their batch position: output row `t * B + b` comes from source row
//! `permute[t] * B + b`. Tables may be repeated or dropped.

use crate::csr::{ensure_len, split_ranges_mut, start_ranges, to_position};
use crate::index::SparseIndex;
use crate::threading::try_for_each_part;
use crate::{RaggedError, Result};

/// Resolve every permutation entry to a source table below `num_tables`.
fn source_tables<P: SparseIndex>(permute: &[P], num_tables: usize) -> Result<Vec<usize>> {
    permute
        .iter()
        .enumerate()
        .map(|(slot, &table)| match table.to_position() {
            Some(t) if t < num_tables => Ok(t),
            _ => {
                tracing::debug!(slot, table = table.as_i64(), num_tables, "invalid permutation entry");
                Err(RaggedError::PermutationOutOfRange {
                    slot,
                    table: table.as_i64(),
                })
            }
        })
        .collect()
}

/// Number of source tables in a per-row buffer of `rows` entries.
fn tables_in(what: &'static str, rows: usize, batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Ok(0);
    }
    if rows % batch_size != 0 {
        return Err(RaggedError::LengthMismatch {
            what,
            expected: (rows / batch_size + 1) * batch_size,
            actual: rows,
        });
    }
    Ok(rows / batch_size)
}

/// `permuted_lengths[t * B + b] = lengths[permute[t] * B + b]`.
pub fn permute_lengths<P, O>(
    permute: &[P],
    batch_size: usize,
    lengths: &[O],
    permuted_lengths: &mut [O],
) -> Result<()>
where
    P: SparseIndex,
    O: SparseIndex,
{
    tracing::trace!(tables = permute.len(), batch_size, "permute_lengths");
    ensure_len(
        "permuted lengths",
        permute.len() * batch_size,
        permuted_lengths.len(),
    )?;
    if batch_size == 0 {
        return Ok(());
    }
    let num_tables = tables_in("lengths", lengths.len(), batch_size)?;
    let sources = source_tables(permute, num_tables)?;

    let parts: Vec<&mut [O]> = permuted_lengths.chunks_mut(batch_size).collect();
    try_for_each_part(parts, lengths.len(), |t, out| {
        let src = sources[t] * batch_size;
        out.copy_from_slice(&lengths[src..src + batch_size]);
        Ok(())
    })
}

/// Copy ragged segments of one buffer into permuted table order.
///
/// Offsets here are per-row *start* boundaries (`T * B` entries each). Output
/// row `b_t` receives `output_offsets[b_t + 1] - output_offsets[b_t]` elements
/// (the last row: everything up to the end of `output`) read contiguously from
/// `input_offsets[permute[t] * B + b]`.
pub fn permute_segments<P, O, T>(
    permute: &[P],
    batch_size: usize,
    input_offsets: &[O],
    input: &[T],
    output_offsets: &[O],
    output: &mut [T],
) -> Result<()>
where
    P: SparseIndex,
    O: SparseIndex,
    T: Copy + Send + Sync,
{
    ensure_len(
        "permute output offsets",
        permute.len() * batch_size,
        output_offsets.len(),
    )?;
    if batch_size == 0 {
        return Ok(());
    }
    let num_tables = tables_in("permute input offsets", input_offsets.len(), batch_size)?;
    let sources = source_tables(permute, num_tables)?;

    let ranges = start_ranges(output_offsets, output.len())?;
    let work = output.len();
    let parts = split_ranges_mut(output, ranges)?;

    try_for_each_part(parts, work, |b_t, out| {
        let t = b_t / batch_size;
        let b = b_t % batch_size;
        let src_slot = sources[t] * batch_size + b;
        let start = to_position(input_offsets[src_slot], src_slot)?;
        let segment = start
            .checked_add(out.len())
            .and_then(|end| input.get(start..end))
            .ok_or(RaggedError::SegmentOutOfRange { segment: b_t })?;
        out.copy_from_slice(segment);
        Ok(())
    })
}

/// Permute the segments of `indices` and, when present, of `weights`.
///
/// See [`permute_segments`] for the offset convention. Weights use the same
/// offsets as the indices and must be given on both sides or on neither.
#[allow(clippy::too_many_arguments)]
pub fn permute_indices_weights<P, O, I, W>(
    permute: &[P],
    batch_size: usize,
    input_offsets: &[O],
    indices: &[I],
    weights: Option<&[W]>,
    output_offsets: &[O],
    permuted_indices: &mut [I],
    permuted_weights: Option<&mut [W]>,
) -> Result<()>
where
    P: SparseIndex,
    O: SparseIndex,
    I: SparseIndex,
    W: Copy + Send + Sync,
{
    tracing::trace!(
        tables = permute.len(),
        batch_size,
        n = indices.len(),
        out = permuted_indices.len(),
        has_weights = weights.is_some(),
        "permute_indices_weights"
    );
    match (weights, permuted_weights) {
        (Some(w), Some(pw)) => {
            ensure_len("permute input weights", indices.len(), w.len())?;
            ensure_len("permuted weights", permuted_indices.len(), pw.len())?;
            permute_segments(
                permute,
                batch_size,
                input_offsets,
                indices,
                output_offsets,
                permuted_indices,
            )?;
            permute_segments(permute, batch_size, input_offsets, w, output_offsets, pw)
        }
        (None, None) => permute_segments(
            permute,
            batch_size,
            input_offsets,
            indices,
            output_offsets,
            permuted_indices,
        ),
        _ => Err(RaggedError::WeightsMismatch),
    }
}

/// `inverse[permute[i]] = i`.
pub fn invert_permute<P: SparseIndex>(permute: &[P], inverse: &mut [P]) -> Result<()> {
    ensure_len("inverse permutation", permute.len(), inverse.len())?;
    let targets = source_tables(permute, permute.len())?;
    for (i, &t) in targets.iter().enumerate() {
        inverse[t] = P::from_position(i);
    }
    Ok(())
}
