//! Allocation tracking for leak detection.
//!
//! Tracks live allocations per [`AllocKind`]. Counters are thread-local: compiled
//! iterator code runs on the thread that calls it, so each test thread observes
//! only its own allocations.

use std::cell::Cell;

/// What a tracked allocation holds.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// Combinator state (enumerate counter cell, zip source table).
    CombinatorState = 0,
    /// Runtime array iterator.
    ArrayIter = 1,
    /// Runtime range iterator.
    RangeIter = 2,
    /// Runtime array storage.
    Array = 3,
}

/// Number of kind slots. Must be greater than the highest `AllocKind` discriminant.
const NUM_KIND_SLOTS: usize = 4;

thread_local! {
    static KIND_COUNTERS: [Cell<i64>; NUM_KIND_SLOTS] = const {
        [const { Cell::new(0) }; NUM_KIND_SLOTS]
    };
    static TOTAL: Cell<i64> = const { Cell::new(0) };
}

impl AllocKind {
    pub const ALL: &'static [AllocKind] = &[
        AllocKind::CombinatorState,
        AllocKind::ArrayIter,
        AllocKind::RangeIter,
        AllocKind::Array,
    ];

    /// Decode a raw kind tag coming from compiled code.
    pub fn from_raw(raw: i32) -> Option<Self> {
        AllocKind::ALL.iter().copied().find(|k| *k as i32 == raw)
    }

    pub fn name(self) -> &'static str {
        match self {
            AllocKind::CombinatorState => "combinator_state",
            AllocKind::ArrayIter => "array_iter",
            AllocKind::RangeIter => "range_iter",
            AllocKind::Array => "array",
        }
    }
}

/// Record an allocation of the given kind.
#[inline]
pub fn track_alloc(kind: AllocKind) {
    TOTAL.with(|t| t.set(t.get() + 1));
    KIND_COUNTERS.with(|c| {
        let slot = &c[kind as usize];
        slot.set(slot.get() + 1);
    });
}

/// Record a deallocation of the given kind.
#[inline]
pub fn track_dealloc(kind: AllocKind) {
    TOTAL.with(|t| t.set(t.get() - 1));
    KIND_COUNTERS.with(|c| {
        let slot = &c[kind as usize];
        slot.set(slot.get() - 1);
    });
}

/// Snapshot the current total allocation count.
pub fn snapshot() -> i64 {
    TOTAL.with(Cell::get)
}

/// Return the difference between the current total and a previous snapshot.
pub fn delta(snap: i64) -> i64 {
    snapshot() - snap
}

/// Live allocation count for a single kind.
pub fn live(kind: AllocKind) -> i64 {
    KIND_COUNTERS.with(|c| c[kind as usize].get())
}
