//! Thread registry.
//!
//! A fixed arena of [`ThreadSlot`]s, one per thread id. Ids are handed out in
//! creation order and never reused, so a slot belongs to exactly one thread
//! for the lifetime of the runtime. Every thread may read every slot; the
//! turn protocol scans all clocks on each decision.

use crate::condvar::CondCore;
use crate::log::ThreadLog;
use crate::mutex::MutexCore;
use lockstep_clock::{ClockCell, CounterError};
use lockstep_types::{CondId, LogicalTime, MutexId, ThreadId};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Binary semaphore used to park condition waiters.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permit: Mutex<bool>,
    cv: Condvar,
}

impl Semaphore {
    /// Block until a permit is available, then take it.
    pub(crate) fn wait(&self) {
        let mut permit = self.permit.lock();
        while !*permit {
            self.cv.wait(&mut permit);
        }
        *permit = false;
    }

    /// Make a permit available. Posting twice before a wait leaves one.
    pub(crate) fn post(&self) {
        *self.permit.lock() = true;
        self.cv.notify_one();
    }
}

/// Per-thread counters reported by the statistics API.
#[derive(Debug, Default)]
pub(crate) struct SlotStats {
    pub(crate) locks: AtomicU64,
    pub(crate) barriers: AtomicU64,
    pub(crate) nondet: AtomicU64,
    pub(crate) turn_waits: AtomicU64,
    pub(crate) turn_spins: AtomicU64,
}

impl SlotStats {
    pub(crate) fn record_turn(&self, spins: u64) {
        self.turn_waits.fetch_add(1, Ordering::Relaxed);
        self.turn_spins.fetch_add(spins, Ordering::Relaxed);
    }

    pub(crate) fn record_lock(&self) {
        self.locks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_barrier(&self) {
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_nondet(&self) {
        self.nondet.fetch_add(1, Ordering::Relaxed);
    }
}

/// Control block for one thread id.
#[derive(Debug)]
pub(crate) struct ThreadSlot {
    pub(crate) id: ThreadId,

    /// Logical clock.
    pub(crate) clock: ClockCell,

    /// Lifecycle handshake between creator, thread and joiner.
    pub(crate) lifecycle_lock: MutexCore,
    pub(crate) lifecycle_cond: CondCore,
    pub(crate) started: AtomicBool,
    pub(crate) finished: AtomicBool,

    /// Set by `cancel`; observed at the thread's next synchronization point.
    pub(crate) cancel_requested: AtomicBool,

    /// Counter failure reported by a thread that could not start.
    pub(crate) start_error: Mutex<Option<CounterError>>,

    /// Determinism kill-switch and the clock saved when it was turned off.
    det_enabled: AtomicBool,
    det_saved: AtomicI64,

    /// Wake signal for condition waits.
    pub(crate) wake: Semaphore,

    pub(crate) stats: SlotStats,
    pub(crate) log: ThreadLog,
}

impl ThreadSlot {
    fn new(id: ThreadId, capacity: usize) -> Self {
        Self {
            id,
            clock: ClockCell::new(),
            lifecycle_lock: MutexCore::new(MutexId(0), capacity),
            lifecycle_cond: CondCore::new(CondId(0), capacity),
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            start_error: Mutex::new(None),
            det_enabled: AtomicBool::new(true),
            det_saved: AtomicI64::new(0),
            wake: Semaphore::default(),
            stats: SlotStats::default(),
            log: ThreadLog::default(),
        }
    }

    /// Prepare the slot for its thread, starting at `clock`.
    pub(crate) fn activate(&self, clock: LogicalTime) {
        self.clock.reset(clock);
        self.det_enabled.store(true, Ordering::SeqCst);
        self.det_saved.store(0, Ordering::SeqCst);
    }

    /// Whether the determinism switch is on.
    pub(crate) fn det_enabled(&self) -> bool {
        self.det_enabled.load(Ordering::SeqCst)
    }

    /// Turn the switch off, remembering `clock`.
    pub(crate) fn switch_off(&self, clock: LogicalTime) {
        self.det_saved.store(clock.get(), Ordering::SeqCst);
        self.det_enabled.store(false, Ordering::SeqCst);
    }

    /// Turn the switch on, returning the clock saved by `switch_off`.
    pub(crate) fn switch_on(&self) -> LogicalTime {
        self.det_enabled.store(true, Ordering::SeqCst);
        LogicalTime(self.det_saved.load(Ordering::SeqCst))
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// Fixed arena of thread slots.
#[derive(Debug)]
pub(crate) struct Registry {
    slots: Box<[ThreadSlot]>,
}

impl Registry {
    /// Create `capacity` empty slots.
    pub(crate) fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| ThreadSlot::new(ThreadId(i), capacity))
            .collect();
        Self { slots }
    }

    /// Slot for `id`.
    ///
    /// Ids come from the runtime's own counter, so an out-of-range id is an
    /// internal bug.
    pub(crate) fn get(&self, id: ThreadId) -> &ThreadSlot {
        &self.slots[id.index()]
    }

    /// Number of slots.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots `0..count`.
    pub(crate) fn iter(&self, count: usize) -> impl Iterator<Item = &ThreadSlot> {
        self.slots[..count.min(self.slots.len())].iter()
    }
}
