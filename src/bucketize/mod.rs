//! Two-pass bucketization of ragged rows by destination shard.
//!
//! The count pass computes, for every (bucket, row) pair, how many elements of
//! the row route to that bucket. The caller prefix-sums the counts into write
//! cursors ([`exclusive_cumsum`](crate::exclusive_cumsum) over the flattened
//! `[my_size, rows]` grid) and the scatter pass writes every element through
//! its cursor. The resulting layout is bucket-major, row-minor, with element
//! order preserved inside each (bucket, row).
//!
//! Every row is processed start-to-end by exactly one task; a row only touches
//! its own `my_size` counts or cursors. The scatter pass snapshots the cursors
//! before dispatch and refuses to write past the start of the next bucket, so
//! malformed cursors produce an error instead of overlapping writes.

mod policy;

pub use policy::{BlockDistribution, CyclicDistribution, Distribution};

use smallvec::{smallvec, SmallVec};

use crate::csr::{
    ensure_len, exclusive_cumsum, inclusive_cumsum, row_range, to_position, validate_offsets,
};
use crate::index::SparseIndex;
use crate::threading::{try_for_each_row, RowOwnedSlice};
use crate::{RaggedError, Result};

/// Per-row bucket counters; most deployments shard over at most 16 workers.
type BucketVec = SmallVec<[usize; 16]>;

/// Destination buffers of a scatter pass.
///
/// `indices` receives the shard-local ids. `weights` must be present exactly
/// when input weights are given; `positions`, when present, receives the
/// row-local position each element had before bucketization.
pub struct BucketOutputs<'a, I, W> {
    pub indices: &'a mut [I],
    pub weights: Option<&'a mut [W]>,
    pub positions: Option<&'a mut [I]>,
}

impl<'a, I, W> BucketOutputs<'a, I, W> {
    pub fn new(indices: &'a mut [I]) -> Self {
        Self {
            indices,
            weights: None,
            positions: None,
        }
    }

    pub fn with_weights(mut self, weights: &'a mut [W]) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_positions(mut self, positions: &'a mut [I]) -> Self {
        self.positions = Some(positions);
        self
    }
}

/// Owned result of [`bucketize_sparse_features`].
#[derive(Debug, Clone, PartialEq)]
pub struct BucketizedFeatures<O, I, W> {
    /// Per-(bucket, row) lengths, shape `[my_size, rows]` flattened bucket-major.
    pub lengths: Vec<O>,
    /// Shard-local ids, grouped by bucket then row.
    pub indices: Vec<I>,
    pub weights: Option<Vec<W>>,
    /// Row-local position of each element in the original batch.
    pub positions: Option<Vec<I>>,
}

/// Batch size `B` for `rows` rows split over the policy's tables.
fn batch_size_of<D: Distribution>(dist: &D, rows: usize) -> Result<usize> {
    let tables = dist.tables();
    if tables == 0 && rows == 0 {
        return Ok(0);
    }
    if tables == 0 || rows % tables != 0 {
        tracing::debug!(rows, tables, "bucketize: rows not divisible by tables");
        return Err(RaggedError::BatchNotDivisible { rows, tables });
    }
    Ok(rows / tables)
}

fn grid_len(my_size: usize, rows: usize) -> Result<usize> {
    my_size
        .checked_mul(rows)
        .ok_or(RaggedError::InvalidShardCount)
}

#[inline]
fn route_index<D: Distribution, I: SparseIndex>(
    dist: &D,
    table: usize,
    index: I,
    position: usize,
) -> Result<(usize, usize)> {
    let index = index
        .to_position()
        .ok_or(RaggedError::NegativeIndex { position })?;
    let (bucket, local) = dist.route(table, index);
    if bucket >= dist.num_buckets() {
        return Err(RaggedError::BucketOverflow { bucket });
    }
    Ok((bucket, local))
}

/// Count pass: `counts[p * rows + r]` = number of elements of row `r` routed to
/// bucket `p`, with `rows = offsets.len()`.
///
/// `offsets` are end boundaries into `indices`. Counts are overwritten.
pub fn bucketize_count<D, O, I>(dist: &D, offsets: &[O], indices: &[I], counts: &mut [O]) -> Result<()>
where
    D: Distribution,
    O: SparseIndex,
    I: SparseIndex,
{
    let rows = offsets.len();
    let my_size = dist.num_buckets();
    tracing::trace!(rows, my_size, n = indices.len(), "bucketize_count");

    ensure_len("bucketize counts", grid_len(my_size, rows)?, counts.len())?;
    let batch = batch_size_of(dist, rows)?;
    validate_offsets(offsets, indices.len())?;

    let counts = RowOwnedSlice::new(counts);
    try_for_each_row(rows, indices.len(), |r| {
        let range = row_range(offsets, r)?;
        let table = r / batch;
        let mut local: BucketVec = smallvec![0; my_size];
        for (i, &index) in range.clone().zip(&indices[range]) {
            let (bucket, _) = route_index(dist, table, index, i)?;
            local[bucket] += 1;
        }
        for (p, &count) in local.iter().enumerate() {
            // Row r owns column r of the [my_size, rows] grid.
            unsafe { counts.write(p * rows + r, O::from_position(count)) };
        }
        Ok(())
    })
}

/// Scatter pass: write every element of every row through its bucket cursor.
///
/// `new_offsets` holds the write cursors, the exclusive prefix sum of the
/// counts produced by [`bucketize_count`] for the same inputs. For element `i`
/// of row `r` routed to `(p, local)`, `local` is written at
/// `new_offsets[p * rows + r]` (together with the element's weight and its
/// row-local position when requested) and the cursor is advanced.
///
/// On return each cursor holds the *end* of its bucket-row. Callers that need
/// the start boundaries must copy them before this call.
pub fn bucketize_scatter<D, O, I, W>(
    dist: &D,
    offsets: &[O],
    indices: &[I],
    weights: Option<&[W]>,
    new_offsets: &mut [O],
    outputs: BucketOutputs<'_, I, W>,
) -> Result<()>
where
    D: Distribution,
    O: SparseIndex,
    I: SparseIndex,
    W: Copy + Send + Sync,
{
    let rows = offsets.len();
    let my_size = dist.num_buckets();
    let BucketOutputs {
        indices: new_indices,
        weights: new_weights,
        positions: new_positions,
    } = outputs;
    let out_len = new_indices.len();
    tracing::trace!(
        rows,
        my_size,
        n = indices.len(),
        out_len,
        has_weights = weights.is_some(),
        has_positions = new_positions.is_some(),
        "bucketize_scatter"
    );

    let grid = grid_len(my_size, rows)?;
    ensure_len("bucketize cursors", grid, new_offsets.len())?;
    let batch = batch_size_of(dist, rows)?;
    validate_offsets(offsets, indices.len())?;

    match (&weights, &new_weights) {
        (Some(w), Some(nw)) => {
            ensure_len("bucketize input weights", indices.len(), w.len())?;
            ensure_len("bucketize output weights", out_len, nw.len())?;
        }
        (None, None) => {}
        _ => return Err(RaggedError::WeightsMismatch),
    }
    if let Some(pos) = &new_positions {
        ensure_len("bucketize output positions", out_len, pos.len())?;
    }

    // Cursor snapshot: bucket-row k may write [starts[k], starts[k + 1]).
    let mut starts = Vec::with_capacity(grid);
    for (k, &cursor) in new_offsets.iter().enumerate() {
        let start = to_position(cursor, k)?;
        if start > out_len || starts.last().is_some_and(|&prev| start < prev) {
            tracing::debug!(k, start, out_len, "bucketize_scatter: invalid cursor");
            return Err(RaggedError::InvalidOffset { position: k });
        }
        starts.push(start);
    }

    let cursors = RowOwnedSlice::new(new_offsets);
    let out_indices = RowOwnedSlice::new(new_indices);
    let out_weights = new_weights.map(RowOwnedSlice::new);
    let out_positions = new_positions.map(RowOwnedSlice::new);

    try_for_each_row(rows, indices.len(), |r| {
        let range = row_range(offsets, r)?;
        let row_start = range.start;
        let table = r / batch;
        let mut local: BucketVec = (0..my_size).map(|p| starts[p * rows + r]).collect();

        for i in range {
            let (bucket, new_index) = route_index(dist, table, indices[i], i)?;
            let k = bucket * rows + r;
            let pos = local[bucket];
            let limit = starts.get(k + 1).copied().unwrap_or(out_len);
            if pos >= limit {
                return Err(RaggedError::BucketOverflow { bucket: k });
            }
            // pos lies in [starts[k], starts[k + 1]), which only row r writes.
            unsafe {
                out_indices.write(pos, I::from_position(new_index));
                if let (Some(out), Some(w)) = (&out_weights, weights) {
                    out.write(pos, w[i]);
                }
                if let Some(out) = &out_positions {
                    out.write(pos, I::from_position(i - row_start));
                }
            }
            local[bucket] = pos + 1;
        }

        for (p, &end) in local.iter().enumerate() {
            unsafe { cursors.write(p * rows + r, O::from_position(end)) };
        }
        Ok(())
    })
}

/// Cyclic count pass: bucket `index % my_size`.
pub fn cyclic_bucketize_count<O, I>(offsets: &[O], indices: &[I], my_size: usize, counts: &mut [O]) -> Result<()>
where
    O: SparseIndex,
    I: SparseIndex,
{
    let dist = CyclicDistribution::new(my_size)?;
    bucketize_count(&dist, offsets, indices, counts)
}

/// Cyclic scatter pass: local id `index / my_size`.
pub fn cyclic_bucketize_scatter<O, I, W>(
    offsets: &[O],
    indices: &[I],
    weights: Option<&[W]>,
    my_size: usize,
    new_offsets: &mut [O],
    outputs: BucketOutputs<'_, I, W>,
) -> Result<()>
where
    O: SparseIndex,
    I: SparseIndex,
    W: Copy + Send + Sync,
{
    let dist = CyclicDistribution::new(my_size)?;
    bucketize_scatter(&dist, offsets, indices, weights, new_offsets, outputs)
}

/// Block count pass: bucket `index / block_sizes[table]`, where the table of
/// row `r` is `r / (rows / block_sizes.len())`.
pub fn block_bucketize_count<O, I>(
    offsets: &[O],
    indices: &[I],
    my_size: usize,
    block_sizes: &[O],
    counts: &mut [O],
) -> Result<()>
where
    O: SparseIndex,
    I: SparseIndex,
{
    let dist = BlockDistribution::new(my_size, block_sizes)?;
    bucketize_count(&dist, offsets, indices, counts)
}

/// Block scatter pass: local id `index % block_sizes[table]`.
pub fn block_bucketize_scatter<O, I, W>(
    offsets: &[O],
    indices: &[I],
    weights: Option<&[W]>,
    my_size: usize,
    block_sizes: &[O],
    new_offsets: &mut [O],
    outputs: BucketOutputs<'_, I, W>,
) -> Result<()>
where
    O: SparseIndex,
    I: SparseIndex,
    W: Copy + Send + Sync,
{
    let dist = BlockDistribution::new(my_size, block_sizes)?;
    bucketize_scatter(&dist, offsets, indices, weights, new_offsets, outputs)
}

/// Bucketize a batch given as per-row `lengths`, allocating all outputs.
///
/// Runs the count pass, prefix-sums the counts into cursors, and runs the
/// scatter pass. Returns bucket-major lengths of shape `[my_size, rows]`.
pub fn bucketize_sparse_features<D, O, I, W>(
    dist: &D,
    lengths: &[O],
    indices: &[I],
    weights: Option<&[W]>,
    bucketize_pos: bool,
) -> Result<BucketizedFeatures<O, I, W>>
where
    D: Distribution,
    O: SparseIndex,
    I: SparseIndex,
    W: Copy + Default + Send + Sync,
{
    let rows = lengths.len();
    let my_size = dist.num_buckets();
    tracing::trace!(rows, my_size, n = indices.len(), "bucketize_sparse_features");

    let mut offsets = vec![O::zero(); rows];
    inclusive_cumsum(lengths, &mut offsets)?;
    let total = match offsets.last() {
        Some(&end) => to_position(end, rows - 1)?,
        None => 0,
    };

    let grid = grid_len(my_size, rows)?;
    let mut new_lengths = vec![O::zero(); grid];
    bucketize_count(dist, &offsets, indices, &mut new_lengths)?;

    let mut cursors = vec![O::zero(); grid];
    exclusive_cumsum(&new_lengths, &mut cursors)?;

    let mut new_indices = vec![I::zero(); total];
    let mut new_weights = weights.map(|_| vec![W::default(); total]);
    let mut new_positions = bucketize_pos.then(|| vec![I::zero(); total]);

    let mut outputs = BucketOutputs::new(&mut new_indices);
    if let Some(w) = new_weights.as_deref_mut() {
        outputs = outputs.with_weights(w);
    }
    if let Some(p) = new_positions.as_deref_mut() {
        outputs = outputs.with_positions(p);
    }
    bucketize_scatter(dist, &offsets, indices, weights, &mut cursors, outputs)?;

    Ok(BucketizedFeatures {
        lengths: new_lengths,
        indices: new_indices,
        weights: new_weights,
        positions: new_positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two rows: [0, 5, 2] and [7, 1]
    const OFFSETS: [i64; 2] = [3, 5];
    const INDICES: [i64; 5] = [0, 5, 2, 7, 1];

    #[test]
    fn test_cyclic_count() {
        let mut counts = [99i64; 4];
        cyclic_bucketize_count(&OFFSETS, &INDICES, 2, &mut counts).unwrap();
        // bucket 0: row0 {0, 2}, row1 {}; bucket 1: row0 {5}, row1 {7, 1}
        assert_eq!(counts, [2, 0, 1, 2]);
    }

    #[test]
    fn test_cyclic_scatter_with_weights_and_positions() {
        let mut counts = [0i64; 4];
        cyclic_bucketize_count(&OFFSETS, &INDICES, 2, &mut counts).unwrap();
        let mut cursors = [0i64; 4];
        exclusive_cumsum(&counts, &mut cursors).unwrap();
        assert_eq!(cursors, [0, 2, 2, 3]);

        let weights = [0.0f32, 0.5, 0.2, 0.7, 0.1];
        let mut new_indices = [0i64; 5];
        let mut new_weights = [0.0f32; 5];
        let mut new_positions = [0i64; 5];
        let outputs = BucketOutputs::new(&mut new_indices)
            .with_weights(&mut new_weights)
            .with_positions(&mut new_positions);
        cyclic_bucketize_scatter(&OFFSETS, &INDICES, Some(&weights[..]), 2, &mut cursors, outputs)
            .unwrap();

        assert_eq!(new_indices, [0, 1, 2, 3, 0]);
        assert_eq!(new_weights, [0.0, 0.2, 0.5, 0.7, 0.1]);
        assert_eq!(new_positions, [0, 2, 1, 0, 1]);
        // Cursors now hold the end of each bucket-row.
        assert_eq!(cursors, [2, 2, 3, 5]);
    }

    #[test]
    fn test_block_count_and_scatter() {
        // Two tables, one row each; block sizes 4 and 2 over 2 shards.
        let offsets = [3i32, 6];
        let indices = [1i32, 5, 9, 0, 3, 2];
        let blocks = [4i32, 2];

        let mut counts = [0i32; 4];
        block_bucketize_count(&offsets, &indices, 2, &blocks, &mut counts).unwrap();
        // table 0: 1 -> p0, 5 -> p1, 9 -> past 8, cyclic p1
        // table 1: 0 -> p0, 3 -> p1, 2 -> p1
        assert_eq!(counts, [1, 1, 2, 2]);

        let mut cursors = [0i32; 4];
        exclusive_cumsum(&counts, &mut cursors).unwrap();
        let mut new_indices = [0i32; 6];
        block_bucketize_scatter::<_, _, f32>(
            &offsets,
            &indices,
            None,
            2,
            &blocks,
            &mut cursors,
            BucketOutputs::new(&mut new_indices),
        )
        .unwrap();
        assert_eq!(new_indices, [1, 0, 1, 4, 1, 0]);
    }

    #[test]
    fn test_block_rows_not_divisible() {
        let mut counts = [0i64; 6];
        assert_eq!(
            block_bucketize_count(&[1i64, 2, 3], &[0i64, 1, 2], 2, &[4i64, 4], &mut counts),
            Err(RaggedError::BatchNotDivisible { rows: 3, tables: 2 })
        );
    }

    #[test]
    fn test_no_tables_accepts_empty_batch() {
        let dist = BlockDistribution::new::<i64>(2, &[]).unwrap();
        let out = bucketize_sparse_features::<_, i64, i64, f32>(&dist, &[], &[], None, true)
            .unwrap();
        assert!(out.lengths.is_empty());
        assert_eq!(out.positions, Some(vec![]));

        let mut counts = [0i64; 2];
        assert_eq!(
            bucketize_count(&dist, &[1i64], &[0i64], &mut counts),
            Err(RaggedError::BatchNotDivisible { rows: 1, tables: 0 })
        );
    }

    #[test]
    fn test_negative_index_rejected() {
        let mut counts = [0i64; 2];
        assert_eq!(
            cyclic_bucketize_count(&[2i64], &[4i64, -1], 2, &mut counts),
            Err(RaggedError::NegativeIndex { position: 1 })
        );
    }

    #[test]
    fn test_scatter_weights_must_pair() {
        let mut cursors = [0i64, 1];
        let mut new_indices = [0i64; 2];
        let err = cyclic_bucketize_scatter(
            &[2i64],
            &[0i64, 1],
            Some(&[1.0f64, 2.0][..]),
            2,
            &mut cursors,
            BucketOutputs::new(&mut new_indices),
        )
        .unwrap_err();
        assert_eq!(err, RaggedError::WeightsMismatch);
    }

    #[test]
    fn test_scatter_overflow_detected() {
        // Cursors claim bucket 0 holds one element, but row 0 routes two there.
        let mut cursors = [0i64, 1];
        let mut new_indices = [0i64; 2];
        let err = cyclic_bucketize_scatter::<_, _, f32>(
            &[2i64],
            &[0i64, 2],
            None,
            2,
            &mut cursors,
            BucketOutputs::new(&mut new_indices),
        )
        .unwrap_err();
        assert_eq!(err, RaggedError::BucketOverflow { bucket: 0 });
    }

    #[test]
    fn test_scatter_rejects_decreasing_cursors() {
        let mut cursors = [1i64, 0];
        let mut new_indices = [0i64; 2];
        let err = cyclic_bucketize_scatter::<_, _, f32>(
            &[2i64],
            &[0i64, 1],
            None,
            2,
            &mut cursors,
            BucketOutputs::new(&mut new_indices),
        )
        .unwrap_err();
        assert_eq!(err, RaggedError::InvalidOffset { position: 1 });
    }

    #[test]
    fn test_pipeline_matches_two_phase() {
        let lengths = [3i64, 2];
        let weights = [0.0f32, 0.5, 0.2, 0.7, 0.1];
        let dist = CyclicDistribution::new(2).unwrap();
        let out = bucketize_sparse_features(&dist, &lengths, &INDICES, Some(&weights[..]), true).unwrap();
        assert_eq!(out.lengths, vec![2, 0, 1, 2]);
        assert_eq!(out.indices, vec![0, 1, 2, 3, 0]);
        assert_eq!(out.weights, Some(vec![0.0, 0.2, 0.5, 0.7, 0.1]));
        assert_eq!(out.positions, Some(vec![0, 2, 1, 0, 1]));
    }

    #[test]
    fn test_pipeline_empty_batch() {
        let dist = CyclicDistribution::new(3).unwrap();
        let out =
            bucketize_sparse_features::<_, i64, i64, f32>(&dist, &[], &[], None, false).unwrap();
        assert!(out.lengths.is_empty());
        assert!(out.indices.is_empty());
        assert_eq!(out.weights, None);
        assert_eq!(out.positions, None);
    }
}
