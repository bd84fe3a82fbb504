//! Fixed-width integer element types used for indices, offsets, lengths and
//! permutation entries.

use std::fmt::Debug;

use num_traits::{PrimInt, WrappingAdd, WrappingMul, WrappingSub};

/// An integer type that can hold sparse feature ids or CSR boundaries.
///
/// Implemented for `i32`, `i64`, `u32` and `u64`. All conversions from wider or
/// unsigned values wrap (two's complement truncation); conversions to buffer
/// positions are checked.
pub trait SparseIndex:
    PrimInt + WrappingAdd + WrappingSub + WrappingMul + Debug + Default + Send + Sync + 'static
{
    /// Convert to a buffer position, `None` if negative or too large for `usize`.
    fn to_position(self) -> Option<usize>;

    /// Wrapping conversion from a buffer position.
    fn from_position(pos: usize) -> Self;

    /// Wrapping conversion from a 64-bit signed value.
    fn from_i64_wrapping(value: i64) -> Self;

    /// Wrapping conversion to `i64`, used in diagnostics.
    fn as_i64(self) -> i64;

    /// Visit the bytes of the native-endian representation in memory order.
    fn for_each_ne_byte(self, f: impl FnMut(u8));
}

macro_rules! impl_sparse_index {
    ($($t:ty),*) => {
        $(
            impl SparseIndex for $t {
                #[inline]
                fn to_position(self) -> Option<usize> {
                    usize::try_from(self).ok()
                }

                #[inline]
                fn from_position(pos: usize) -> Self {
                    pos as $t
                }

                #[inline]
                fn from_i64_wrapping(value: i64) -> Self {
                    value as $t
                }

                #[inline]
                fn as_i64(self) -> i64 {
                    self as i64
                }

                #[inline]
                fn for_each_ne_byte(self, f: impl FnMut(u8)) {
                    self.to_ne_bytes().into_iter().for_each(f);
                }
            }
        )*
    };
}

impl_sparse_index!(i32, i64, u32, u64);
