//! Runtime statistics.

use crate::registry::ThreadSlot;
use crate::runtime::Runtime;
use lockstep_types::{LogicalTime, ThreadId};
use serde::Serialize;
use std::sync::atomic::Ordering;
use tracing::info;

/// Counters for one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadStats {
    pub thread: ThreadId,
    pub clock: i64,
    /// Events from the counter stream.
    pub hw_events: i64,
    /// Events added by the runtime (bumps, fast-forwards, increments).
    pub sw_events: i64,
    /// Wake-ups and catch-ups whose timing was not reproducible.
    pub nondet_events: u64,
    pub locks: u64,
    pub barriers: u64,
    pub turn_waits: u64,
    pub turn_spins: u64,
    pub finished: bool,
}

impl ThreadStats {
    fn capture(slot: &ThreadSlot) -> Self {
        Self {
            thread: slot.id,
            clock: slot.clock.read().get(),
            hw_events: slot.clock.hw_events(),
            sw_events: slot.clock.sw_events(),
            nondet_events: slot.stats.nondet.load(Ordering::Relaxed),
            locks: slot.stats.locks.load(Ordering::Relaxed),
            barriers: slot.stats.barriers.load(Ordering::Relaxed),
            turn_waits: slot.stats.turn_waits.load(Ordering::Relaxed),
            turn_spins: slot.stats.turn_spins.load(Ordering::Relaxed),
            finished: slot.finished.load(Ordering::SeqCst),
        }
    }

    /// Whether the thread's clock is retired or suspended.
    pub fn is_parked(&self) -> bool {
        LogicalTime(self.clock).is_sentinel()
    }
}

/// Snapshot of the whole runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub threads: Vec<ThreadStats>,
    pub created_threads: usize,
    pub active_threads: usize,
    pub mutexes: u32,
    pub conds: u32,
    pub barriers: u32,
    pub last_sync: i64,
}

impl RuntimeStats {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Stats for `thread`, if it was created.
    pub fn thread(&self, thread: ThreadId) -> Option<&ThreadStats> {
        self.threads.iter().find(|t| t.thread == thread)
    }

    /// Sum of per-thread lock acquisitions.
    pub fn total_locks(&self) -> u64 {
        self.threads.iter().map(|t| t.locks).sum()
    }
}

impl Runtime {
    /// Snapshot of every created thread's counters.
    ///
    /// Clocks of running threads are read remotely and may be stale.
    pub fn stats(&self) -> RuntimeStats {
        let engine = self.engine();
        let (mutexes, conds, barriers) = engine.counts();
        let created = engine.max_thr();
        RuntimeStats {
            threads: engine.registry.iter(created).map(ThreadStats::capture).collect(),
            created_threads: created,
            active_threads: engine.num_thr(),
            mutexes,
            conds,
            barriers,
            last_sync: engine.last_sync().get(),
        }
    }

    /// Log the calling thread's counters, and the runtime totals when called
    /// from the master.
    pub fn print_stats(&self) {
        let engine = self.engine();
        let me = engine.me();
        let paused = engine.pause(me);
        let own = ThreadStats::capture(engine.slot(me));
        engine.resume(me, paused);

        info!(
            thread = %me,
            clock = own.clock,
            hw_events = own.hw_events,
            sw_events = own.sw_events,
            nondet = own.nondet_events,
            locks = own.locks,
            barriers = own.barriers,
            turn_waits = own.turn_waits,
            turn_spins = own.turn_spins,
            "Thread statistics"
        );
        if me.is_master() {
            let (mutexes, conds, barriers) = engine.counts();
            info!(
                threads = engine.max_thr(),
                mutexes,
                conds,
                barriers,
                last_sync = engine.last_sync().get(),
                "Runtime statistics"
            );
        }
    }
}
