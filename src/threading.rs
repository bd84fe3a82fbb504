//! Rayon-based dispatch of row-owned work.
//!
//! Every transform in this crate partitions its work into independent units
//! (rows, segments, permutation slots, rank blocks). A unit is always handled
//! start-to-end by one task, so the only shared mutable state is what a unit
//! explicitly owns. Below [`MIN_THREAD_LENGTH`](crate::MIN_THREAD_LENGTH)
//! elements, or without the `parallel` feature, the same closures run on the
//! calling thread.

use std::marker::PhantomData;

use crate::Result;

/// Whether `work` elements are worth splitting across the pool.
#[cfg(feature = "parallel")]
#[inline]
fn should_split(work: usize) -> bool {
    work > crate::MIN_THREAD_LENGTH && rayon::current_num_threads() > 1
}

/// Run `f` for every unit in `0..units`, in parallel when `work` is large.
///
/// Stops at the first error. Which error is reported when several units fail
/// concurrently is unspecified.
#[cfg_attr(not(feature = "parallel"), allow(unused_variables))]
pub(crate) fn try_for_each_row<F>(units: usize, work: usize, f: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if should_split(work) {
            use rayon::prelude::*;
            return (0..units).into_par_iter().try_for_each(f);
        }
    }
    (0..units).try_for_each(f)
}

/// Run `f` on every owned part (typically a disjoint output sub-slice).
#[cfg_attr(not(feature = "parallel"), allow(unused_variables))]
pub(crate) fn try_for_each_part<P, F>(parts: Vec<P>, work: usize, f: F) -> Result<()>
where
    P: Send,
    F: Fn(usize, P) -> Result<()> + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if should_split(work) {
            use rayon::prelude::*;
            return parts
                .into_par_iter()
                .enumerate()
                .try_for_each(|(i, part)| f(i, part));
        }
    }
    parts
        .into_iter()
        .enumerate()
        .try_for_each(|(i, part)| f(i, part))
}

/// Run `f` on every element of `items` with its position.
#[cfg_attr(not(feature = "parallel"), allow(unused_variables))]
pub(crate) fn try_for_each_mut<T, F>(items: &mut [T], work: usize, f: F) -> Result<()>
where
    T: Send,
    F: Fn(usize, &mut T) -> Result<()> + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if should_split(work) {
            use rayon::prelude::*;
            return items
                .par_iter_mut()
                .enumerate()
                .try_for_each(|(i, item)| f(i, item));
        }
    }
    items
        .iter_mut()
        .enumerate()
        .try_for_each(|(i, item)| f(i, item))
}

/// A mutable slice shared between tasks that write disjoint positions.
///
/// Used where ownership is decided by the data (bucketizer cursors and
/// outputs) and cannot be expressed by splitting the slice up front.
pub(crate) struct RowOwnedSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

unsafe impl<T: Send> Send for RowOwnedSlice<'_, T> {}
unsafe impl<T: Send> Sync for RowOwnedSlice<'_, T> {}

impl<'a, T: Copy> RowOwnedSlice<'a, T> {
    pub(crate) fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    /// # Safety
    /// `i` is in bounds, and no other task reads or writes position `i` during
    /// the lifetime of this handle.
    #[inline]
    pub(crate) unsafe fn write(&self, i: usize, value: T) {
        debug_assert!(i < self.len);
        *self.ptr.add(i) = value;
    }
}
