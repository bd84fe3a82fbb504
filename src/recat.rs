//! Rank-major regrouping of mixed-width gradient buffers.
//!
//! A pooled-embedding gradient of shape `[B, sum(D_r)]` is partitioned by
//! columns: rank `r` owns columns `[cum[r], cum[r] + D_r)`. Before a rank-keyed
//! exchange it is rewritten so that each rank's `[B, D_r]` block is contiguous,
//! blocks concatenated in rank order.

use crate::csr::{ensure_len, split_ranges_mut};
use crate::threading::try_for_each_part;
use crate::{RaggedError, Result};

/// Validate the rank layout and return the row width of the gradient.
fn row_width(
    dim_sum_per_rank: &[usize],
    cum_dim_sum_per_rank: &[usize],
    len: usize,
    batch_size: usize,
) -> Result<usize> {
    ensure_len(
        "cum_dim_sum_per_rank",
        dim_sum_per_rank.len(),
        cum_dim_sum_per_rank.len(),
    )?;
    if batch_size == 0 {
        return Err(RaggedError::InvalidBatchSize);
    }
    if len % batch_size != 0 {
        return Err(RaggedError::LengthMismatch {
            what: "gradient buffer",
            expected: (len / batch_size + 1) * batch_size,
            actual: len,
        });
    }
    let width = len / batch_size;

    let mut running = 0usize;
    for (rank, (&dim, &cum)) in dim_sum_per_rank
        .iter()
        .zip(cum_dim_sum_per_rank)
        .enumerate()
    {
        match cum.checked_add(dim) {
            Some(end) if cum == running && end <= width => running = end,
            _ => {
                tracing::debug!(rank, dim, cum, width, "recat: inconsistent rank layout");
                return Err(RaggedError::ShapeMismatch { rank });
            }
        }
    }
    Ok(width)
}

/// Rank block boundaries in the rank-major buffer.
fn rank_blocks(dim_sum_per_rank: &[usize], batch_size: usize) -> Vec<std::ops::Range<usize>> {
    let mut start = 0usize;
    dim_sum_per_rank
        .iter()
        .map(|&dim| {
            let range = start..start + batch_size * dim;
            start = range.end;
            range
        })
        .collect()
}

/// Column-partitioned `[B, sum(D_r)]` gradient to rank-major blocks.
///
/// `output[B * cum[r] + b * D_r + d] = grad_output[b * width + cum[r] + d]`.
/// `output` must have the same length as `grad_output`; columns past the last
/// rank, if any, are not copied.
pub fn recat_embedding_grad_output_mixed_d<T: Copy + Send + Sync>(
    dim_sum_per_rank: &[usize],
    cum_dim_sum_per_rank: &[usize],
    grad_output: &[T],
    batch_size: usize,
    output: &mut [T],
) -> Result<()> {
    tracing::trace!(
        ranks = dim_sum_per_rank.len(),
        batch_size,
        n = grad_output.len(),
        "recat_embedding_grad_output_mixed_d"
    );
    ensure_len("recat output", grad_output.len(), output.len())?;
    if grad_output.is_empty() {
        return Ok(());
    }
    let width = row_width(
        dim_sum_per_rank,
        cum_dim_sum_per_rank,
        grad_output.len(),
        batch_size,
    )?;

    let blocks = rank_blocks(dim_sum_per_rank, batch_size);
    let parts = split_ranges_mut(output, blocks)?;
    try_for_each_part(parts, grad_output.len(), |r, block| {
        let dim = dim_sum_per_rank[r];
        if dim == 0 {
            return Ok(());
        }
        let col = cum_dim_sum_per_rank[r];
        for (b, dst) in block.chunks_exact_mut(dim).enumerate() {
            let src = b * width + col;
            dst.copy_from_slice(&grad_output[src..src + dim]);
        }
        Ok(())
    })
}

/// Inverse of [`recat_embedding_grad_output_mixed_d`]: rank-major blocks back
/// to the column-partitioned `[B, width]` layout.
pub fn uncat_embedding_grad_output_mixed_d<T: Copy + Send + Sync>(
    dim_sum_per_rank: &[usize],
    cum_dim_sum_per_rank: &[usize],
    rank_major: &[T],
    batch_size: usize,
    grad_output: &mut [T],
) -> Result<()> {
    tracing::trace!(
        ranks = dim_sum_per_rank.len(),
        batch_size,
        n = rank_major.len(),
        "uncat_embedding_grad_output_mixed_d"
    );
    ensure_len("uncat output", rank_major.len(), grad_output.len())?;
    if rank_major.is_empty() {
        return Ok(());
    }
    let width = row_width(
        dim_sum_per_rank,
        cum_dim_sum_per_rank,
        rank_major.len(),
        batch_size,
    )?;
    if width == 0 {
        return Ok(());
    }

    let rows: Vec<&mut [T]> = grad_output.chunks_exact_mut(width).collect();
    try_for_each_part(rows, rank_major.len(), |b, row| {
        for (&dim, &col) in dim_sum_per_rank.iter().zip(cum_dim_sum_per_rank) {
            let src = batch_size * col + b * dim;
            row[col..col + dim].copy_from_slice(&rank_major[src..src + dim]);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recat_two_ranks() {
        // B = 2, D = [1, 2]
        // row 0: a0 | b0 b1
        // row 1: a1 | b2 b3
        let grad = [10, 20, 21, 11, 22, 23];
        let mut out = [0; 6];
        recat_embedding_grad_output_mixed_d(&[1, 2], &[0, 1], &grad, 2, &mut out).unwrap();
        assert_eq!(out, [10, 11, 20, 21, 22, 23]);
    }

    #[test]
    fn test_uncat_restores() {
        let grad: Vec<u32> = (0..24).collect();
        let dims = [3, 0, 1, 2];
        let cum = [0, 3, 3, 4];
        let mut rank_major = vec![0u32; 24];
        recat_embedding_grad_output_mixed_d(&dims, &cum, &grad, 4, &mut rank_major).unwrap();
        assert_ne!(rank_major, grad);

        let mut back = vec![0u32; 24];
        uncat_embedding_grad_output_mixed_d(&dims, &cum, &rank_major, 4, &mut back).unwrap();
        assert_eq!(back, grad);
    }

    #[test]
    fn test_recat_inconsistent_prefix_sum() {
        let grad = [0i32; 6];
        let mut out = [0i32; 6];
        assert_eq!(
            recat_embedding_grad_output_mixed_d(&[1, 2], &[0, 2], &grad, 2, &mut out),
            Err(RaggedError::ShapeMismatch { rank: 1 })
        );
    }

    #[test]
    fn test_recat_width_overflow() {
        let grad = [0i32; 6];
        let mut out = [0i32; 6];
        assert_eq!(
            recat_embedding_grad_output_mixed_d(&[2, 2], &[0, 2], &grad, 2, &mut out),
            Err(RaggedError::ShapeMismatch { rank: 1 })
        );
    }

    #[test]
    fn test_recat_dim_near_usize_max() {
        let grad = [0i32; 6];
        let mut out = [0i32; 6];
        assert_eq!(
            recat_embedding_grad_output_mixed_d(&[1, usize::MAX], &[0, 1], &grad, 2, &mut out),
            Err(RaggedError::ShapeMismatch { rank: 1 })
        );
        let mut back = [0i32; 6];
        assert_eq!(
            uncat_embedding_grad_output_mixed_d(&[usize::MAX, 1], &[0, 0], &grad, 2, &mut back),
            Err(RaggedError::ShapeMismatch { rank: 0 })
        );
    }

    #[test]
    fn test_recat_zero_batch() {
        let grad = [0i32; 2];
        let mut out = [0i32; 2];
        assert_eq!(
            recat_embedding_grad_output_mixed_d(&[1], &[0], &grad, 0, &mut out),
            Err(RaggedError::InvalidBatchSize)
        );
    }
}
