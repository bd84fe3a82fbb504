//! Expansion of CSR offsets into row-local positions.

use crate::csr::{ensure_len, split_ranges_mut, to_position};
use crate::index::SparseIndex;
use crate::threading::try_for_each_part;
use crate::Result;

/// Write the zero-based position of every element within its own row.
///
/// Row `r` spans `[offsets[r - 1], offsets[r])` (row 0 starts at 0), except the
/// last row, which always ends at `range_size`. `output` must hold exactly
/// `range_size` elements; elements outside every row are left untouched.
///
/// ```rust
/// use ragged_shard::offsets_range;
///
/// let mut out = vec![0i64; 7];
/// offsets_range(&[2i64, 5, 7], 7, &mut out).unwrap();
/// assert_eq!(out, vec![0, 1, 0, 1, 2, 0, 1]);
/// ```
pub fn offsets_range<O: SparseIndex>(offsets: &[O], range_size: usize, output: &mut [O]) -> Result<()> {
    tracing::trace!(rows = offsets.len(), range_size, "offsets_range");
    ensure_len("offsets_range output", range_size, output.len())?;
    let rows = offsets.len();
    if rows == 0 {
        return Ok(());
    }

    let mut ranges = Vec::with_capacity(rows);
    let mut start = 0usize;
    for r in 0..rows {
        let end = if r + 1 == rows {
            range_size
        } else {
            to_position(offsets[r], r)?
        };
        ranges.push(start..end);
        start = end;
    }
    let parts = split_ranges_mut(output, ranges).inspect_err(|e| {
        tracing::debug!(error = %e, "offsets_range: offsets do not fit the output");
    })?;

    try_for_each_part(parts, range_size, |_, row| {
        for (i, out) in row.iter_mut().enumerate() {
            *out = O::from_position(i);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RaggedError;

    #[test]
    fn test_worked_example() {
        let mut out = vec![-1i32; 7];
        offsets_range(&[2i32, 5, 7], 7, &mut out).unwrap();
        assert_eq!(out, vec![0, 1, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_last_row_extends_to_range_size() {
        // The final boundary is ignored in favor of range_size.
        let mut out = vec![-1i64; 6];
        offsets_range(&[1i64, 3, 4], 6, &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 1, 0, 1, 2]);
    }

    #[test]
    fn test_empty_rows() {
        let mut out = vec![-1i64; 3];
        offsets_range(&[0i64, 0, 2, 2], 3, &mut out).unwrap();
        assert_eq!(out, vec![0, 1, 0]);
    }

    #[test]
    fn test_no_rows_leaves_output() {
        let mut out = vec![9i64; 2];
        offsets_range::<i64>(&[], 2, &mut out).unwrap();
        assert_eq!(out, vec![9, 9]);
    }

    #[test]
    fn test_length_mismatch() {
        let mut out = vec![0i64; 3];
        assert!(matches!(
            offsets_range(&[2i64, 5], 5, &mut out),
            Err(RaggedError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_offsets_past_range_size() {
        let mut out = vec![0i64; 4];
        assert_eq!(
            offsets_range(&[6i64, 7], 4, &mut out),
            Err(RaggedError::InvalidOffset { position: 0 })
        );
    }
}
