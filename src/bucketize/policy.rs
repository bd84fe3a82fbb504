//! Distribution policies: which shard an index belongs to, and its id there.

use crate::index::SparseIndex;
use crate::{RaggedError, Result};

/// A rule that routes a non-negative feature index to a shard.
///
/// Rows are grouped into [`Distribution::tables`] tables of equal batch size;
/// the policy may route differently per table.
pub trait Distribution: Sync {
    /// Number of shards (`my_size`).
    fn num_buckets(&self) -> usize;

    /// Number of tables the rows of a batch are grouped into.
    fn tables(&self) -> usize;

    /// Shard and shard-local index of `index`, a feature of table `table`.
    ///
    /// The shard must be below [`Distribution::num_buckets`]; the bucketizers
    /// reject anything else.
    fn route(&self, table: usize, index: usize) -> (usize, usize);
}

/// Cyclic distribution: shard `index % my_size`, local index `index / my_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclicDistribution {
    my_size: usize,
}

impl CyclicDistribution {
    pub fn new(my_size: usize) -> Result<Self> {
        if my_size == 0 {
            return Err(RaggedError::InvalidShardCount);
        }
        Ok(Self { my_size })
    }

    pub fn my_size(&self) -> usize {
        self.my_size
    }
}

impl Distribution for CyclicDistribution {
    #[inline]
    fn num_buckets(&self) -> usize {
        self.my_size
    }

    #[inline]
    fn tables(&self) -> usize {
        1
    }

    #[inline]
    fn route(&self, _table: usize, index: usize) -> (usize, usize) {
        (index % self.my_size, index / self.my_size)
    }
}

/// Block distribution: each table is cut into contiguous blocks of
/// `block_sizes[table]` ids, shard `p` holding ids `[p * block, (p + 1) * block)`.
///
/// Ids past the last block (`index >= block * my_size`) fall back to the cyclic
/// rule so that every id lands on a valid shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDistribution {
    my_size: usize,
    block_sizes: Vec<usize>,
}

impl BlockDistribution {
    pub fn new<O: SparseIndex>(my_size: usize, block_sizes: &[O]) -> Result<Self> {
        if my_size == 0 {
            return Err(RaggedError::InvalidShardCount);
        }
        let block_sizes = block_sizes
            .iter()
            .enumerate()
            .map(|(table, &b)| match b.to_position() {
                Some(b) if b > 0 => Ok(b),
                _ => Err(RaggedError::InvalidBlockSize { table }),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            my_size,
            block_sizes,
        })
    }

    pub fn my_size(&self) -> usize {
        self.my_size
    }

    pub fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }
}

impl Distribution for BlockDistribution {
    #[inline]
    fn num_buckets(&self) -> usize {
        self.my_size
    }

    #[inline]
    fn tables(&self) -> usize {
        self.block_sizes.len()
    }

    #[inline]
    fn route(&self, table: usize, index: usize) -> (usize, usize) {
        let block = self.block_sizes[table];
        match block.checked_mul(self.my_size) {
            Some(span) if index >= span => (index % self.my_size, index / self.my_size),
            _ => (index / block, index % block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_route() {
        let d = CyclicDistribution::new(4).unwrap();
        assert_eq!(d.route(0, 0), (0, 0));
        assert_eq!(d.route(0, 7), (3, 1));
        assert_eq!(d.route(0, 8), (0, 2));
    }

    #[test]
    fn test_cyclic_rejects_zero_shards() {
        assert_eq!(
            CyclicDistribution::new(0),
            Err(RaggedError::InvalidShardCount)
        );
    }

    #[test]
    fn test_block_route() {
        let d = BlockDistribution::new(4, &[10i64, 3]).unwrap();
        assert_eq!(d.route(0, 23), (2, 3));
        assert_eq!(d.route(0, 39), (3, 9));
        assert_eq!(d.route(1, 5), (1, 2));
    }

    #[test]
    fn test_block_route_past_last_block_is_cyclic() {
        let d = BlockDistribution::new(4, &[10i64]).unwrap();
        // 40 = 4 * 10 is the first id past the last block
        assert_eq!(d.route(0, 40), (0, 10));
        assert_eq!(d.route(0, 45), (1, 11));
    }

    #[test]
    fn test_block_rejects_bad_block_sizes() {
        assert_eq!(
            BlockDistribution::new(2, &[4i32, 0]),
            Err(RaggedError::InvalidBlockSize { table: 1 })
        );
        assert_eq!(
            BlockDistribution::new(2, &[-1i64]),
            Err(RaggedError::InvalidBlockSize { table: 0 })
        );
        assert_eq!(
            BlockDistribution::new(0, &[1i64]),
            Err(RaggedError::InvalidShardCount)
        );
    }
}
