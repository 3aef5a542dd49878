//! Caller-supplied stacks shared across worker threads.
//!
//! Inputs are shared read-only through `Arc`. The output stack needs one
//! carefully-fenced seam: every work unit owns a disjoint region of it, so
//! workers may write concurrently without synchronization.

use std::cell::UnsafeCell;
use std::ops::Range;

/// An output stack with interior mutability over disjoint regions.
///
/// The dispatcher is the only code that creates regions, and it assigns
/// each element range to exactly one work unit.
pub struct SharedStack<T> {
    ptr: *mut T,
    len: usize,
    data: UnsafeCell<Vec<T>>,
}

unsafe impl<T: Send> Send for SharedStack<T> {}
unsafe impl<T: Send> Sync for SharedStack<T> {}

impl<T> SharedStack<T> {
    pub fn new(mut data: Vec<T>) -> Self {
        let ptr = data.as_mut_ptr();
        let len = data.len();
        SharedStack { ptr, len, data: UnsafeCell::new(data) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mutable view of one region.
    ///
    /// # Safety
    ///
    /// `range` must lie within the stack and must not be aliased by any
    /// other live view; the work-unit dispatcher guarantees both by
    /// assigning every unit a distinct region.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn region_mut(&self, range: Range<usize>) -> &mut [T] {
        debug_assert!(range.start <= range.end && range.end <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.add(range.start), range.len())
    }

    /// Reclaim the buffer once every worker is done with it.
    pub fn into_vec(self) -> Vec<T> {
        self.data.into_inner()
    }
}
