//! Sum reduction over CSR segments of fixed-width rows.

use std::ops::Add;

use num_traits::Zero;

use crate::csr::{ensure_len, to_position};
use crate::index::SparseIndex;
use crate::threading::try_for_each_mut;
use crate::{RaggedError, Result, REDUCE_GROUP_WIDTH};

/// Tree-reduce one chunk of at most [`REDUCE_GROUP_WIDTH`] values.
///
/// Lanes past the chunk length hold zero; each round adds the upper half of
/// the active lanes onto the lower half.
#[inline]
fn reduce_chunk<V: Copy + Zero + Add<Output = V>>(chunk: &[V]) -> V {
    debug_assert!(chunk.len() <= REDUCE_GROUP_WIDTH);
    let mut lanes = [V::zero(); REDUCE_GROUP_WIDTH];
    lanes[..chunk.len()].copy_from_slice(chunk);
    let mut active = chunk.len().next_power_of_two();
    while active > 1 {
        active /= 2;
        for lane in 0..active {
            lanes[lane] = lanes[lane] + lanes[lane + active];
        }
    }
    lanes[0]
}

/// `output[s]` = sum of `values[csr_seg[s] * batch_size .. csr_seg[s + 1] * batch_size]`.
///
/// `csr_seg` holds `output.len() + 1` segment boundaries in row units; every
/// row is `batch_size` values wide. Each segment is walked in chunks of
/// [`REDUCE_GROUP_WIDTH`] values, every chunk is tree-reduced, and the chunk
/// partials are accumulated in order. Integer sums are exact; float sums may
/// differ from a left-to-right sum by rounding.
pub fn segment_sum_csr<O, V>(
    batch_size: usize,
    csr_seg: &[O],
    values: &[V],
    output: &mut [V],
) -> Result<()>
where
    O: SparseIndex,
    V: Copy + Zero + Add<Output = V> + Send + Sync,
{
    let num_segments = output.len();
    tracing::trace!(num_segments, batch_size, n = values.len(), "segment_sum_csr");
    ensure_len("segment boundaries", num_segments + 1, csr_seg.len())?;

    try_for_each_mut(output, values.len(), |s, out| {
        let start_row = to_position(csr_seg[s], s)?;
        let end_row = to_position(csr_seg[s + 1], s + 1)?;
        let segment = start_row
            .checked_mul(batch_size)
            .zip(end_row.checked_mul(batch_size))
            .filter(|(start, end)| start <= end)
            .and_then(|(start, end)| values.get(start..end))
            .ok_or_else(|| {
                tracing::debug!(segment = s, start_row, end_row, "segment_sum_csr: segment out of range");
                RaggedError::SegmentOutOfRange { segment: s }
            })?;

        let mut acc = V::zero();
        for chunk in segment.chunks(REDUCE_GROUP_WIDTH) {
            acc = acc + reduce_chunk(chunk);
        }
        *out = acc;
        Ok(())
    })
}
