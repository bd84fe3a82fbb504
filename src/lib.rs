//! Data-parallel redistribution kernels for ragged sparse feature batches.
//!
//! Recommendation models shard their embedding tables across workers. Before
//! each exchange the sparse inputs (flat feature ids plus row boundaries) have to
//! be hashed, split by destination shard, reordered by table, and afterwards the
//! gradients have to be regrouped by rank. This crate provides those transforms
//! as functions over caller-owned slices.
//!
//! # Data model
//!
//! A ragged batch is a flat `indices` buffer split into rows by `offsets`, where
//! `offsets[r]` is the *exclusive end* of row `r` and row `r` starts at
//! `offsets[r - 1]` (or `0` for the first row). Rows are grouped into `T` tables
//! of `B` rows each and flattened row-major (`row = t * B + b`).
//!
//! # Transforms
//!
//! - [`index_hash`]: seeded byte-wise hash of every index into `[0, modulo)`
//! - [`offsets_range`]: row-local position of every element
//! - [`cyclic_bucketize_count`] / [`cyclic_bucketize_scatter`]: split rows by
//!   `index mod my_size`
//! - [`block_bucketize_count`] / [`block_bucketize_scatter`]: split rows by
//!   per-table contiguous blocks
//! - [`permute_lengths`] / [`permute_indices_weights`]: reorder tables
//! - [`construct_offsets`]: per-segment lengths from per-table batch offsets
//! - [`segment_sum_csr`]: sum over CSR segments of fixed-width rows
//! - [`recat_embedding_grad_output_mixed_d`]: regroup a column-partitioned
//!   gradient by destination rank
//!
//! The bucketizers are two-phase: the count pass produces per-(bucket, row)
//! counts, the caller turns them into write cursors with [`exclusive_cumsum`],
//! and the scatter pass writes through those cursors.
//! [`bucketize_sparse_features`] runs the whole sequence.
//!
//! # Example
//!
//! ```rust
//! use ragged_shard::{bucketize_sparse_features, CyclicDistribution};
//!
//! // Two rows: [3, 4, 5] and [6]
//! let lengths = vec![3i64, 1];
//! let indices = vec![3i64, 4, 5, 6];
//! let dist = CyclicDistribution::new(2).unwrap();
//!
//! let out = bucketize_sparse_features::<_, _, _, f32>(&dist, &lengths, &indices, None, false)
//!     .unwrap();
//!
//! // Bucket-major lengths: bucket 0 gets [4] and [6], bucket 1 gets [3, 5].
//! assert_eq!(out.lengths, vec![1, 1, 2, 0]);
//! assert_eq!(out.indices, vec![2, 3, 1, 2]);
//! ```
//!
//! # Parallelism
//!
//! With the default `parallel` feature, work larger than [`MIN_THREAD_LENGTH`]
//! elements is split across the rayon global pool. Each task owns a whole row
//! (or segment, slot, rank block); results do not depend on the thread count.

mod bucketize;
mod csr;
mod hash;
mod index;
mod offsets;
mod permute;
mod range;
mod recat;
mod segment_reduce;
mod threading;

// ============================================================================
// Element types
// ============================================================================
pub use index::SparseIndex;

// ============================================================================
// CSR helpers
// ============================================================================
pub use csr::{
    complete_cumsum, exclusive_cumsum, inclusive_cumsum, lengths_to_offsets, offsets_to_lengths,
};

// ============================================================================
// Transforms
// ============================================================================
pub use bucketize::{
    block_bucketize_count, block_bucketize_scatter, bucketize_count, bucketize_scatter,
    bucketize_sparse_features, cyclic_bucketize_count, cyclic_bucketize_scatter,
    BlockDistribution, BucketOutputs, BucketizedFeatures, CyclicDistribution, Distribution,
};
pub use hash::{hash_index, index_hash};
pub use offsets::construct_offsets;
pub use permute::{invert_permute, permute_indices_weights, permute_lengths, permute_segments};
pub use range::offsets_range;
pub use recat::{recat_embedding_grad_output_mixed_d, uncat_embedding_grad_output_mixed_d};
pub use segment_reduce::segment_sum_csr;

// ============================================================================
// Constants
// ============================================================================

/// Minimum number of elements to justify multi-threaded execution.
///
/// Smaller inputs run on the calling thread; the per-task overhead of rayon
/// dominates below this size.
pub const MIN_THREAD_LENGTH: usize = 1 << 15;

/// Number of lanes reduced together in one chunk of [`segment_sum_csr`].
pub const REDUCE_GROUP_WIDTH: usize = 256;

// ============================================================================
// Error types
// ============================================================================

/// Errors reported by the redistribution transforms.
///
/// Only cheap preconditions are checked. Whatever is checked is reported here
/// instead of producing out-of-range writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaggedError {
    /// A buffer does not have the length the other arguments imply.
    #[error("{what}: expected length {expected}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Hash modulo must be positive.
    #[error("hash modulo must be positive")]
    InvalidModulo,

    /// Shard count must be positive.
    #[error("shard count must be positive")]
    InvalidShardCount,

    /// Block size of a table must be positive.
    #[error("block size of table {table} must be positive")]
    InvalidBlockSize { table: usize },

    /// Batch size must be positive.
    #[error("batch size must be positive")]
    InvalidBatchSize,

    /// The number of rows is not a multiple of the number of tables.
    #[error("{rows} rows cannot be split evenly into {tables} tables")]
    BatchNotDivisible { rows: usize, tables: usize },

    /// An offset is negative, decreasing, or past the end of its buffer.
    #[error("invalid offset at position {position}")]
    InvalidOffset { position: usize },

    /// A negative index cannot be routed to a shard.
    #[error("negative index at position {position}")]
    NegativeIndex { position: usize },

    /// Weights were supplied on only one side of a bucketizer call.
    #[error("weights must be given for both input and output, or for neither")]
    WeightsMismatch,

    /// A routed bucket id is outside `[0, my_size)`, or a scatter cursor ran
    /// past the start of the next bucket.
    #[error("bucket {bucket} overflowed its write range")]
    BucketOverflow { bucket: usize },

    /// A permutation entry names a table that does not exist.
    #[error("permutation slot {slot} names table {table} out of range")]
    PermutationOutOfRange { slot: usize, table: i64 },

    /// A segment reads past the end of its input buffer.
    #[error("segment {segment} reads past the input buffer")]
    SegmentOutOfRange { segment: usize },

    /// Per-rank widths do not describe the gradient buffer.
    #[error("rank {rank} layout does not fit the gradient buffer")]
    ShapeMismatch { rank: usize },
}

/// Result type for redistribution operations.
pub type Result<T> = std::result::Result<T, RaggedError>;
