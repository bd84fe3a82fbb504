//! Seeded byte-wise index hashing.

use crate::csr::ensure_len;
use crate::index::SparseIndex;
use crate::threading::try_for_each_mut;
use crate::{RaggedError, Result};

const SEED_MULTIPLIER: i64 = 0xDEAD_BEEF;
const BYTE_MULTIPLIER: i64 = 65537;

/// Hash one index into `[0, modulo)`.
///
/// The accumulator has the width of `I` and starts at `seed * 0xDEADBEEF`; each
/// byte of the index (native byte order) is folded in as `acc * 65537 + byte`.
/// The accumulator wraps. The result is `acc % modulo` (truncating), shifted
/// up by `modulo` when negative; that last step cannot overflow.
///
/// `modulo` must be positive; [`index_hash`] checks it, this function does not.
#[inline]
pub fn hash_index<I: SparseIndex>(index: I, seed: i64, modulo: I) -> I {
    let multiplier = I::from_i64_wrapping(BYTE_MULTIPLIER);
    let mut acc = I::from_i64_wrapping(seed).wrapping_mul(&I::from_i64_wrapping(SEED_MULTIPLIER));
    index.for_each_ne_byte(|byte| {
        acc = acc
            .wrapping_mul(&multiplier)
            .wrapping_add(&I::from_i64_wrapping(byte as i64));
    });
    let r = acc % modulo;
    if r < I::zero() {
        r + modulo
    } else {
        r
    }
}

/// Hash every index: `output[i] = hash_index(indices[i], seed, modulo)`.
pub fn index_hash<I: SparseIndex>(
    indices: &[I],
    seed: i64,
    modulo: I,
    output: &mut [I],
) -> Result<()> {
    tracing::trace!(n = indices.len(), seed, modulo = ?modulo, "index_hash");
    if modulo <= I::zero() {
        tracing::debug!(modulo = ?modulo, "index_hash: non-positive modulo");
        return Err(RaggedError::InvalidModulo);
    }
    ensure_len("index_hash output", indices.len(), output.len())?;

    try_for_each_mut(output, indices.len(), |i, out| {
        *out = hash_index(indices[i], seed, modulo);
        Ok(())
    })
}
