//! CSR boundary helpers and prefix sums.
//!
//! Rows use the end-boundary convention: `offsets[r]` is the exclusive end of
//! row `r`, and row `r` starts where row `r - 1` ended (row 0 starts at 0).
//! The prefix sums here are what callers use to turn per-row lengths or
//! per-bucket counts into such boundaries, or into write cursors.

use std::ops::Range;

use crate::index::SparseIndex;
use crate::{RaggedError, Result};

/// Convert a boundary value to a buffer position, reporting `position` on failure.
#[inline]
pub(crate) fn to_position<O: SparseIndex>(value: O, position: usize) -> Result<usize> {
    value
        .to_position()
        .ok_or(RaggedError::InvalidOffset { position })
}

/// Element range of row `r` under the end-boundary convention.
#[inline]
pub(crate) fn row_range<O: SparseIndex>(offsets: &[O], r: usize) -> Result<Range<usize>> {
    let start = if r == 0 {
        0
    } else {
        to_position(offsets[r - 1], r - 1)?
    };
    let end = to_position(offsets[r], r)?;
    if end < start {
        return Err(RaggedError::InvalidOffset { position: r });
    }
    Ok(start..end)
}

/// Check that end boundaries are non-negative, non-decreasing and stay within
/// a buffer of `total` elements.
pub(crate) fn validate_offsets<O: SparseIndex>(offsets: &[O], total: usize) -> Result<()> {
    let mut prev = 0usize;
    for (position, &value) in offsets.iter().enumerate() {
        let end = to_position(value, position)?;
        if end < prev || end > total {
            tracing::debug!(position, end, prev, total, "rejecting CSR offsets");
            return Err(RaggedError::InvalidOffset { position });
        }
        prev = end;
    }
    Ok(())
}

/// Split `buf` into the disjoint sub-slices named by `ranges`.
///
/// Ranges must be ordered and non-overlapping; gaps between them are skipped.
/// The error position is the index of the first offending range.
pub(crate) fn split_ranges_mut<'a, T>(
    buf: &'a mut [T],
    ranges: impl IntoIterator<Item = Range<usize>>,
) -> Result<Vec<&'a mut [T]>> {
    let mut rest = buf;
    let mut consumed = 0usize;
    let mut parts = Vec::new();
    for (position, range) in ranges.into_iter().enumerate() {
        if range.start < consumed || range.end < range.start || range.end > consumed + rest.len()
        {
            return Err(RaggedError::InvalidOffset { position });
        }
        let tail = std::mem::take(&mut rest);
        let (_, tail) = tail.split_at_mut(range.start - consumed);
        let (part, tail) = tail.split_at_mut(range.end - range.start);
        parts.push(part);
        rest = tail;
        consumed = range.end;
    }
    Ok(parts)
}

/// Segments described by start boundaries: segment `k` spans
/// `[starts[k], starts[k + 1])`, the last one runs to `total`.
pub(crate) fn start_ranges<O: SparseIndex>(starts: &[O], total: usize) -> Result<Vec<Range<usize>>> {
    let mut ranges = Vec::with_capacity(starts.len());
    for k in 0..starts.len() {
        let start = to_position(starts[k], k)?;
        let end = match starts.get(k + 1) {
            Some(&next) => to_position(next, k + 1)?,
            None => total,
        };
        if end < start {
            return Err(RaggedError::InvalidOffset { position: k });
        }
        ranges.push(start..end);
    }
    Ok(ranges)
}

/// Fail with [`RaggedError::LengthMismatch`] unless `actual == expected`.
pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(RaggedError::LengthMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Exclusive prefix sum: `output[i] = input[0] + ... + input[i - 1]`, `output[0] = 0`.
///
/// This is the step that turns bucketizer counts into scatter cursors.
pub fn exclusive_cumsum<O: SparseIndex>(input: &[O], output: &mut [O]) -> Result<()> {
    ensure_len("exclusive_cumsum output", input.len(), output.len())?;
    let mut acc = O::zero();
    for (out, &value) in output.iter_mut().zip(input) {
        *out = acc;
        acc = acc.wrapping_add(&value);
    }
    Ok(())
}

/// Inclusive prefix sum: `output[i] = input[0] + ... + input[i]`.
pub fn inclusive_cumsum<O: SparseIndex>(input: &[O], output: &mut [O]) -> Result<()> {
    ensure_len("inclusive_cumsum output", input.len(), output.len())?;
    let mut acc = O::zero();
    for (out, &value) in output.iter_mut().zip(input) {
        acc = acc.wrapping_add(&value);
        *out = acc;
    }
    Ok(())
}

/// Complete prefix sum of length `n + 1`: a leading zero followed by the
/// inclusive sums.
pub fn complete_cumsum<O: SparseIndex>(input: &[O], output: &mut [O]) -> Result<()> {
    ensure_len("complete_cumsum output", input.len() + 1, output.len())?;
    output[0] = O::zero();
    inclusive_cumsum(input, &mut output[1..])
}

/// Per-row lengths to end-boundary offsets.
pub fn lengths_to_offsets<O: SparseIndex>(lengths: &[O], offsets: &mut [O]) -> Result<()> {
    inclusive_cumsum(lengths, offsets)
}

/// End-boundary offsets back to per-row lengths.
pub fn offsets_to_lengths<O: SparseIndex>(offsets: &[O], lengths: &mut [O]) -> Result<()> {
    ensure_len("offsets_to_lengths output", offsets.len(), lengths.len())?;
    let mut prev = O::zero();
    for (len, &end) in lengths.iter_mut().zip(offsets) {
        *len = end.wrapping_sub(&prev);
        prev = end;
    }
    Ok(())
}
