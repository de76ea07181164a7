//! Assertion macros for scheduler invariants.
//!
//! Two tiers:
//! - `debug_assert_*`: structural bookkeeping checks, active only in debug
//!   builds (`#[cfg(debug_assertions)]`), zero overhead in release.
//! - `fatal_*`: internal-consistency faults. These fire in every build:
//!   continuing past them would hand corrupted work ordering to hardware.
//!   Each logs through `tracing::error!` before panicking.

// =============================================================================
// Ledger bound: never more entries than usable ring slots
// =============================================================================

/// Assert that the ledger fits in the ring.
///
/// **Invariant**: `ledger.len() ≤ capacity - 1`
///
/// Used in: `Scheduler::push_entry_locked()` after pushing
macro_rules! debug_assert_ledger_bounded {
    ($len:expr, $usable:expr) => {
        debug_assert!(
            $len <= $usable,
            "ledger bound violated: {} entries exceed {} usable ring slots",
            $len,
            $usable
        )
    };
}

// =============================================================================
// Pool/ledger agreement: every in-use slot belongs to exactly one entry
// =============================================================================

/// Assert that the semaphore pool's in-use count tracks the ledger.
///
/// **Invariant**: `pool.in_use() == ledger.len()` (outside preemption)
///
/// Used in: `retire_locked()`, `append()`, `resubmit()`
macro_rules! debug_assert_pool_matches_ledger {
    ($in_use:expr, $ledger_len:expr) => {
        debug_assert_eq!(
            $in_use, $ledger_len,
            "pool/ledger mismatch: {} slots in use, {} ledger entries",
            $in_use, $ledger_len
        )
    };
}

// =============================================================================
// Frozen bound
// =============================================================================

/// Assert that no more entries are unpublished than are in the ledger.
///
/// **Invariant**: `frozen_count ≤ ledger.len()`
macro_rules! debug_assert_frozen_bounded {
    ($frozen:expr, $ledger_len:expr) => {
        debug_assert!(
            $frozen <= $ledger_len,
            "frozen count {} exceeds ledger size {}",
            $frozen,
            $ledger_len
        )
    };
}

// =============================================================================
// Fatal: completion ordering
// =============================================================================

/// An entry completed before its predecessor (by hardware timestamp).
macro_rules! fatal_out_of_order {
    ($sub:expr, $entry:expr, $ts:expr, $prev_ts:expr) => {{
        tracing::error!(
            sub_device = $sub,
            entry = ?$entry,
            timestamp = $ts,
            predecessor_timestamp = $prev_ts,
            "runlist entry completed before its predecessor"
        );
        panic!(
            "out-of-order completion on sub-device {}: {:?} at {} precedes predecessor at {}",
            $sub, $entry, $ts, $prev_ts
        )
    }};
}

/// A not-yet-done entry's semaphore already shows its target payload.
macro_rules! fatal_spurious_completion {
    ($sub:expr, $entry:expr, $blocked_by:expr) => {{
        tracing::error!(
            sub_device = $sub,
            entry = ?$entry,
            blocked_by = ?$blocked_by,
            "semaphore shows payload of an entry queued behind an incomplete one"
        );
        panic!(
            "spurious completion on sub-device {}: {:?} done while {:?} is pending",
            $sub, $entry, $blocked_by
        )
    }};
}

// =============================================================================
// Fatal: ring memory does not match the ledger
// =============================================================================

/// The encoded ring entry differs from what the ledger says was written.
macro_rules! fatal_ring_mismatch {
    ($pos:expr, $expected:expr, $found:expr) => {{
        tracing::error!(
            position = $pos,
            expected = ?$expected,
            found = ?$found,
            "runlist memory does not match ledger"
        );
        panic!(
            "runlist entry {} corrupted: expected {:?}, found {:?}",
            $pos, $expected, $found
        )
    }};
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_frozen_bounded;
pub(crate) use debug_assert_ledger_bounded;
pub(crate) use debug_assert_pool_matches_ledger;
pub(crate) use fatal_out_of_order;
pub(crate) use fatal_ring_mismatch;
pub(crate) use fatal_spurious_completion;
