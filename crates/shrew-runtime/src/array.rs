//! i64 array iterable and its iterator.
//!
//! `RtArray` is an external *iterable*: `getiter` builds a fresh, owned
//! [`ArrayIter`] which compiled code must release. The array counts every
//! `next` call made by any of its iterators so tests can observe how often a
//! combinator advanced a source.

use std::cell::Cell;
use std::ptr;

use crate::alloc_track::{self, AllocKind};
use crate::status::{STATUS_OK, STATUS_STOP_ITERATION};

/// Runtime array storage.
pub struct RtArray {
    data: Vec<i64>,
    next_calls: Cell<u64>,
}

impl RtArray {
    pub fn new(data: Vec<i64>) -> Box<Self> {
        alloc_track::track_alloc(AllocKind::Array);
        Box::new(Self {
            data,
            next_calls: Cell::new(0),
        })
    }

    pub fn from_slice(values: &[i64]) -> Box<Self> {
        Self::new(values.to_vec())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total `next` calls made through iterators over this array.
    pub fn next_calls(&self) -> u64 {
        self.next_calls.get()
    }

    /// Raw iterable pointer handed to compiled code.
    pub fn as_raw(&self) -> *mut u8 {
        self as *const RtArray as *mut u8
    }
}

impl Drop for RtArray {
    fn drop(&mut self) {
        alloc_track::track_dealloc(AllocKind::Array);
    }
}

/// Iterator over an [`RtArray`]. The array must outlive it.
#[repr(C)]
pub struct ArrayIter {
    array: *const RtArray,
    index: usize,
}

/// Create a fresh iterator over `array`. The caller owns the result.
#[unsafe(no_mangle)]
pub extern "C" fn shrew_array_getiter(array: *const RtArray) -> *mut ArrayIter {
    alloc_track::track_alloc(AllocKind::ArrayIter);
    Box::into_raw(Box::new(ArrayIter { array, index: 0 }))
}

/// Advance an array iterator, writing the next element to `out`.
#[unsafe(no_mangle)]
#[expect(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn shrew_array_iter_next(iter: *mut ArrayIter, out: *mut u8) -> i32 {
    let iter = unsafe { &mut *iter };
    let array = unsafe { &*iter.array };
    array.next_calls.set(array.next_calls.get() + 1);

    match array.data.get(iter.index) {
        Some(&value) => {
            iter.index += 1;
            unsafe { ptr::write_unaligned(out as *mut i64, value) };
            STATUS_OK
        }
        None => STATUS_STOP_ITERATION,
    }
}

/// Release an iterator returned by [`shrew_array_getiter`].
#[unsafe(no_mangle)]
pub extern "C" fn shrew_array_iter_release(iter: *mut ArrayIter) {
    if iter.is_null() {
        return;
    }
    unsafe { drop(Box::from_raw(iter)) };
    alloc_track::track_dealloc(AllocKind::ArrayIter);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next(iter: *mut ArrayIter) -> Option<i64> {
        let mut out: i64 = 0;
        match shrew_array_iter_next(iter, &mut out as *mut i64 as *mut u8) {
            STATUS_OK => Some(out),
            STATUS_STOP_ITERATION => None,
            other => panic!("unexpected status {other}"),
        }
    }

    #[test]
    fn iterates_in_order_then_stops() {
        let array = RtArray::from_slice(&[4, 5, 6]);
        let iter = shrew_array_getiter(&*array);
        assert_eq!(next(iter), Some(4));
        assert_eq!(next(iter), Some(5));
        assert_eq!(next(iter), Some(6));
        assert_eq!(next(iter), None);
        shrew_array_iter_release(iter);
        assert_eq!(array.next_calls(), 4);
    }

    #[test]
    fn iterators_are_independent() {
        let array = RtArray::from_slice(&[1, 2]);
        let a = shrew_array_getiter(&*array);
        let b = shrew_array_getiter(&*array);
        assert_eq!(next(a), Some(1));
        assert_eq!(next(b), Some(1));
        assert_eq!(next(a), Some(2));
        shrew_array_iter_release(a);
        shrew_array_iter_release(b);
    }

    #[test]
    fn getiter_and_release_balance_tracking() {
        let array = RtArray::from_slice(&[]);
        let before = alloc_track::live(AllocKind::ArrayIter);
        let iter = shrew_array_getiter(&*array);
        assert_eq!(alloc_track::live(AllocKind::ArrayIter), before + 1);
        assert_eq!(next(iter), None);
        shrew_array_iter_release(iter);
        assert_eq!(alloc_track::live(AllocKind::ArrayIter), before);
    }
}
