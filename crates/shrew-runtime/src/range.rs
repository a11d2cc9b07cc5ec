//! Half-open i64 range iterator.
//!
//! Unlike [`crate::array::RtArray`], a range is already an *iterator*: `getiter`
//! on it is the identity and hands back a borrowed alias, so combinators that
//! wrap a range never release it.

use std::ptr;

use crate::alloc_track::{self, AllocKind};
use crate::status::{STATUS_OK, STATUS_STOP_ITERATION};

#[repr(C)]
pub struct RangeIter {
    current: i64,
    end: i64,
    next_calls: u64,
}

impl RangeIter {
    pub fn next_calls(&self) -> u64 {
        self.next_calls
    }
}

/// Create a range iterator yielding `start..end`. The caller owns the result.
#[unsafe(no_mangle)]
pub extern "C" fn shrew_range_new(start: i64, end: i64) -> *mut RangeIter {
    alloc_track::track_alloc(AllocKind::RangeIter);
    Box::into_raw(Box::new(RangeIter {
        current: start,
        end,
        next_calls: 0,
    }))
}

/// Advance a range iterator, writing the current value to `out`.
#[unsafe(no_mangle)]
#[expect(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn shrew_range_next(iter: *mut RangeIter, out: *mut u8) -> i32 {
    let range = unsafe { &mut *iter };
    range.next_calls += 1;
    if range.current >= range.end {
        return STATUS_STOP_ITERATION;
    }
    unsafe { ptr::write_unaligned(out as *mut i64, range.current) };
    range.current += 1;
    STATUS_OK
}

/// Release a range iterator created by [`shrew_range_new`].
#[unsafe(no_mangle)]
pub extern "C" fn shrew_range_release(iter: *mut RangeIter) {
    if iter.is_null() {
        return;
    }
    unsafe { drop(Box::from_raw(iter)) };
    alloc_track::track_dealloc(AllocKind::RangeIter);
}
