//! Flat per-segment lengths from per-table batch offsets.

use crate::csr::ensure_len;
use crate::index::SparseIndex;
use crate::threading::try_for_each_part;
use crate::{RaggedError, Result};

/// Build the length array of a `[T, B]` grid of segments.
///
/// `batch_offsets` has `T * B` entries: for each table, the start of each
/// batch row inside that table's own index range. `total_indices_per_table[t]`
/// is the end of table `t`'s range. Writes
///
/// ```text
/// output[1 + t*B + b] = upper - lower
///   lower = batch_offsets[t*B + b]
///   upper = batch_offsets[t*B + b + 1]   if b < B - 1
///         = total_indices_per_table[t]   otherwise
/// ```
///
/// `output` has `T * B + 1` entries; `output[0]` is not written. Zero it and
/// run [`inclusive_cumsum`](crate::inclusive_cumsum) over the result to get
/// global offsets.
pub fn construct_offsets<O: SparseIndex>(
    batch_offsets: &[O],
    total_indices_per_table: &[O],
    output: &mut [O],
) -> Result<()> {
    let tables = total_indices_per_table.len();
    tracing::trace!(tables, n = batch_offsets.len(), "construct_offsets");
    ensure_len("construct_offsets output", batch_offsets.len() + 1, output.len())?;
    if tables == 0 {
        if batch_offsets.is_empty() {
            return Ok(());
        }
        return Err(RaggedError::BatchNotDivisible {
            rows: batch_offsets.len(),
            tables,
        });
    }
    if batch_offsets.len() % tables != 0 {
        return Err(RaggedError::BatchNotDivisible {
            rows: batch_offsets.len(),
            tables,
        });
    }
    let batch = batch_offsets.len() / tables;
    if batch == 0 {
        return Ok(());
    }

    let parts: Vec<&mut [O]> = output[1..].chunks_mut(batch).collect();
    try_for_each_part(parts, batch_offsets.len(), |t, out| {
        let row = &batch_offsets[t * batch..(t + 1) * batch];
        for b in 0..batch {
            let upper = if b + 1 < batch {
                row[b + 1]
            } else {
                total_indices_per_table[t]
            };
            out[b] = upper.wrapping_sub(&row[b]);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inclusive_cumsum;

    #[test]
    fn test_construct_offsets() {
        // T = 2, B = 3. Table 0 rows start at [0, 2, 2] of 5; table 1 at [0, 1, 4] of 4.
        let batch_offsets = [0i64, 2, 2, 0, 1, 4];
        let totals = [5i64, 4];
        let mut out = [-1i64; 7];
        construct_offsets(&batch_offsets, &totals, &mut out).unwrap();
        assert_eq!(out, [-1, 2, 0, 3, 1, 3, 0]);

        out[0] = 0;
        let lengths = out;
        inclusive_cumsum(&lengths, &mut out).unwrap();
        assert_eq!(out, [0, 2, 2, 5, 6, 9, 9]);
    }

    #[test]
    fn test_single_row_per_table() {
        let mut out = [0i32; 3];
        construct_offsets(&[0i32, 0], &[3i32, 7], &mut out).unwrap();
        assert_eq!(out, [0, 3, 7]);
    }

    #[test]
    fn test_rows_not_divisible() {
        let mut out = [0i64; 4];
        assert_eq!(
            construct_offsets(&[0i64, 1, 2], &[3i64, 3], &mut out),
            Err(RaggedError::BatchNotDivisible { rows: 3, tables: 2 })
        );
    }

    #[test]
    fn test_output_length_mismatch() {
        let mut out = [0i64; 2];
        assert!(matches!(
            construct_offsets(&[0i64, 1], &[3i64], &mut out),
            Err(RaggedError::LengthMismatch { .. })
        ));
    }
}
