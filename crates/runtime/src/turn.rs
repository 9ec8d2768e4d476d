//! Global ordering protocol.
//!
//! A thread may perform a synchronization decision only when its logical
//! clock is the unique minimum over all registered threads, with ties broken
//! by the smaller id. [`wait_for_turn`] busy-waits until that holds.
//!
//! The caller's clock must be paused, so its own value is fixed for the
//! duration of the wait. Other clocks only move forward (or jump to a
//! sentinel), so once every other thread has been seen above the caller it
//! stays there until the caller bumps its own clock. A thread created during
//! the scan invalidates it; the scan restarts whenever `max_thr` changed.

use crate::error::WaitError;
use crate::runtime::Engine;
use lockstep_types::{LogicalTime, ThreadId};
use std::sync::atomic::{fence, Ordering};

/// Spin until `me` holds the global minimum clock, then return that clock.
///
/// Returns `Err(WaitError::Cancelled)` if `me` is cancelled while waiting.
pub(crate) fn wait_for_turn(engine: &Engine, me: ThreadId) -> Result<LogicalTime, WaitError> {
    if engine.max_thr() == 0 {
        return Ok(LogicalTime::ZERO);
    }

    let slot = engine.slot(me);
    debug_assert!(
        !slot.clock.is_enabled(),
        "{me}: clock must be paused while waiting for turn"
    );
    let mine = slot.clock.read();
    let mut spins = 0u64;

    'retry: loop {
        if slot.is_cancel_requested() {
            return Err(WaitError::Cancelled);
        }

        let nthreads = engine.max_thr();
        for i in 1..nthreads {
            let other = ThreadId((me.index() + i) % nthreads);
            let theirs = engine.clock_of(me, other);
            if mine.yields_to(me.index(), theirs, other.index()) {
                spins += 1;
                std::hint::spin_loop();
                continue 'retry;
            }
        }

        fence(Ordering::SeqCst);
        if engine.max_thr() != nthreads {
            engine.event(3, me, format_args!("threads changed to {}", engine.max_thr()));
            continue 'retry;
        }
        break;
    }

    slot.stats.record_turn(spins);
    engine.event(3, me, format_args!("turn at {mine} after {spins} spins"));
    Ok(mine)
}
