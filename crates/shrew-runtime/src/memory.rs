//! Ownership-transfer primitives called by compiled code.
//!
//! Combinator constructors acquire their state through [`shrew_alloc`] and the
//! matching release routine hands it back through [`shrew_free`]. Identity
//! `getiter` never reaches this module: a borrowed alias is neither acquired
//! nor released.

use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};

use crate::alloc_track::{self, AllocKind};

fn layout_for(size: i64, align: i64) -> Layout {
    // Zero-sized state (a zip over no sources) still gets a unique address.
    let size = (size.max(1)) as usize;
    let align = (align.max(1)) as usize;
    Layout::from_size_align(size, align).expect("INTERNAL: invalid state layout")
}

/// Allocate zeroed storage for owned iterator state.
#[unsafe(no_mangle)]
pub extern "C" fn shrew_alloc(size: i64, align: i64, kind: i32) -> *mut u8 {
    let layout = layout_for(size, align);
    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        handle_alloc_error(layout);
    }
    let tracked = AllocKind::from_raw(kind);
    if let Some(kind) = tracked {
        alloc_track::track_alloc(kind);
    }
    tracing::trace!(
        size,
        align,
        kind = tracked.map_or("untracked", AllocKind::name),
        ?ptr,
        "shrew_alloc"
    );
    ptr
}

/// Release storage obtained from [`shrew_alloc`] with the same size and alignment.
#[unsafe(no_mangle)]
pub extern "C" fn shrew_free(ptr: *mut u8, size: i64, align: i64, kind: i32) {
    if ptr.is_null() {
        return;
    }
    let tracked = AllocKind::from_raw(kind);
    tracing::trace!(
        size,
        align,
        kind = tracked.map_or("untracked", AllocKind::name),
        ?ptr,
        "shrew_free"
    );
    unsafe { dealloc(ptr, layout_for(size, align)) };
    if let Some(kind) = tracked {
        alloc_track::track_dealloc(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_zeroed_and_tracked() {
        let snap = alloc_track::snapshot();
        let ptr = shrew_alloc(24, 8, AllocKind::CombinatorState as i32);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 8, 0);
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 24) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(alloc_track::delta(snap), 1);

        shrew_free(ptr, 24, 8, AllocKind::CombinatorState as i32);
        assert_eq!(alloc_track::delta(snap), 0);
    }

    #[test]
    fn zero_sized_state_gets_a_real_pointer() {
        let snap = alloc_track::snapshot();
        let ptr = shrew_alloc(0, 1, AllocKind::CombinatorState as i32);
        assert!(!ptr.is_null());
        shrew_free(ptr, 0, 1, AllocKind::CombinatorState as i32);
        assert_eq!(alloc_track::delta(snap), 0);
    }

    #[test]
    fn free_null_is_a_no_op() {
        let snap = alloc_track::snapshot();
        shrew_free(std::ptr::null_mut(), 8, 8, AllocKind::CombinatorState as i32);
        assert_eq!(alloc_track::delta(snap), 0);
    }
}
