//! Debug assertion macros for the ring-queue topology invariants.
//!
//! Only active in debug builds (`debug_assert!`), so there is zero
//! overhead in release builds.

/// Assert that the requested capacity was floored to the minimum.
///
/// **Invariant**: a ring always has `capacity >= 2`, hence `capacity + 1`
/// pages in the cycle.
macro_rules! debug_assert_min_capacity {
    ($cap:expr) => {
        debug_assert!(
            $cap >= 2,
            "ring capacity {} below the structural minimum of 2",
            $cap
        )
    };
}

/// Assert that a page pointer taken from the ring is non-null.
///
/// **Invariant**: the cycle is closed at construction and pages are never
/// freed while the queue is alive, so no in-ring link is ever null.
macro_rules! debug_assert_ring_link {
    ($ptr:expr) => {
        debug_assert!(
            !$ptr.is_null(),
            "null link observed inside the page cycle"
        )
    };
}

/// Assert the counters stay coherent: values read never exceed values
/// written.
///
/// **Invariant**: `reads <= writes` at every observable moment.
macro_rules! debug_assert_reads_behind_writes {
    ($reads:expr, $writes:expr) => {
        debug_assert!(
            $reads <= $writes,
            "read counter {} ahead of write counter {}",
            $reads,
            $writes
        )
    };
}

pub(crate) use debug_assert_min_capacity;
pub(crate) use debug_assert_reads_behind_writes;
pub(crate) use debug_assert_ring_link;
