//! Deterministic condition variable.
//!
//! Waiters queue in arrival order and park on their own slot's wake
//! semaphore. An ordered waiter leaves ordering while it sleeps (its clock is
//! parked at the suspension sentinel) and the signaler decides when it comes
//! back: the woken thread gets the signaler's clock plus one. Broadcast wakes
//! waiters in queue order with consecutive clocks, so the order in which they
//! reacquire the mutex is fixed.

use crate::error::{SyncError, WaitError};
use crate::mutex::{DetMutexGuard, MutexCore, RawDetMutex};
use crate::runtime::{Engine, Runtime};
use lockstep_types::{CondId, LogicalTime, ThreadId, WaitQueue};
use parking_lot::Mutex;
use std::time::Duration;

/// A queued waiter and whether it was ordered when it went to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Waiter {
    pub(crate) id: ThreadId,
    pub(crate) ordered: bool,
}

#[derive(Debug)]
pub(crate) struct CondCore {
    id: CondId,
    queue: Mutex<WaitQueue<Waiter>>,
}

impl CondCore {
    pub(crate) fn new(id: CondId, capacity: usize) -> Self {
        Self {
            id,
            queue: Mutex::new(WaitQueue::with_capacity(capacity)),
        }
    }

    pub(crate) fn id(&self) -> CondId {
        self.id
    }

    pub(crate) fn waiters(&self) -> usize {
        self.queue.lock().len()
    }

    /// Release `mutex`, sleep until signalled, reacquire `mutex`.
    ///
    /// On `Err(WaitError::Cancelled)` the mutex is not held.
    pub(crate) fn wait(
        &self,
        engine: &Engine,
        me: ThreadId,
        mutex: &MutexCore,
    ) -> Result<(), WaitError> {
        mutex.check_owner(me)?;

        let slot = engine.slot(me);
        let paused = engine.pause(me);
        let ordered = engine.is_enabled(me);
        let clock = slot.clock.read();

        if ordered {
            if let Err(e) = engine.ensure_finite(me, clock) {
                mutex.release_for_wait(engine, me, false, clock);
                engine.resume(me, paused);
                return Err(e);
            }
            // Leave ordering before anyone can observe the queue entry or the
            // free mutex.
            slot.clock.set(LogicalTime::SUSPENDED);
        }

        let waiter = Waiter { id: me, ordered };
        if let Err(e) = self.queue.lock().push(waiter) {
            panic!("{}: waiter queue overflow for {me}: {e}", self.id);
        }
        engine.event(1, me, format_args!("cond_wait({}) at {clock}", self.id));
        mutex.release_for_wait(engine, me, ordered, clock);

        slot.wake.wait();

        if slot.is_cancel_requested() {
            self.queue.lock().remove(waiter);
            engine.resume(me, paused);
            return Err(WaitError::Cancelled);
        }
        if ordered && slot.clock.read().is_sentinel() {
            // Woken by a thread outside ordering; the wake-up time is not
            // reproducible.
            slot.clock.set(clock.next());
            slot.stats.record_nondet();
            engine.event(1, me, format_args!("cond_wait({}) unordered wake", self.id));
        }
        engine.event(1, me, format_args!("cond_wake({})", self.id));
        engine.resume(me, paused);

        mutex.lock(engine, me)
    }

    /// Wake the longest-waiting thread, if any.
    pub(crate) fn signal(&self, engine: &Engine, me: ThreadId) -> Result<(), WaitError> {
        let slot = engine.slot(me);
        let paused = engine.pause(me);
        let ordered = engine.is_enabled(me);
        let clock = slot.clock.read();
        if ordered {
            if let Err(e) = engine.ensure_finite(me, clock) {
                engine.resume(me, paused);
                return Err(e);
            }
        }

        let popped = self.queue.lock().pop();
        if let Some(waiter) = popped {
            let target = engine.slot(waiter.id);
            if ordered && waiter.ordered {
                target.clock.set(clock.next());
            }
            engine.event(
                1,
                me,
                format_args!("cond_signal({}) wakes {}", self.id, waiter.id),
            );
            target.wake.post();
        }

        if ordered {
            slot.clock.bump(1);
        }
        engine.resume(me, paused);
        Ok(())
    }

    /// Wake every thread queued at the time of the call, in queue order.
    pub(crate) fn broadcast(&self, engine: &Engine, me: ThreadId) -> Result<(), WaitError> {
        let paused = engine.pause(me);
        let queued = self.waiters();
        engine.event(1, me, format_args!("cond_broadcast({}) x{queued}", self.id));
        let mut result = Ok(());
        for _ in 0..queued {
            result = self.signal(engine, me);
            if result.is_err() {
                break;
            }
        }
        engine.resume(me, paused);
        result
    }
}

/// Condition variable used with [`RawDetMutex`].
#[derive(Debug)]
pub struct RawDetCondvar {
    rt: Runtime,
    core: CondCore,
}

impl RawDetCondvar {
    /// Create a condition variable with the next cond id of `rt`.
    pub fn new(rt: &Runtime) -> Self {
        let engine = rt.engine();
        let core = CondCore::new(engine.next_cond_id(), engine.registry.capacity());
        engine.event(1, engine.me(), format_args!("cond_init({})", core.id()));
        Self {
            rt: rt.clone(),
            core,
        }
    }

    /// Id assigned at creation.
    pub fn id(&self) -> CondId {
        self.core.id()
    }

    /// Release `mutex`, wait for a signal, reacquire `mutex`.
    ///
    /// The caller must hold `mutex`.
    pub fn wait(&self, mutex: &RawDetMutex) -> Result<(), SyncError> {
        let engine = self.rt.engine();
        let me = engine.me();
        engine.cancel_point(me);
        let result = self.core.wait(engine, me, mutex.core());
        engine.settle(me, result)
    }

    /// Like [`wait`](Self::wait). The timeout is not enforced: a timed wait
    /// would make the wake-up time depend on the wall clock. Always reports
    /// `false` (not timed out).
    pub fn wait_timeout(&self, mutex: &RawDetMutex, timeout: Duration) -> Result<bool, SyncError> {
        let engine = self.rt.engine();
        engine.event(
            2,
            engine.me(),
            format_args!("cond_timedwait({}) ignores {timeout:?}", self.id()),
        );
        self.wait(mutex).map(|_| false)
    }

    /// Wake the longest-waiting thread, if any.
    pub fn signal(&self) -> Result<(), SyncError> {
        let engine = self.rt.engine();
        let me = engine.me();
        engine.cancel_point(me);
        let result = self.core.signal(engine, me);
        engine.settle(me, result)
    }

    /// Wake every waiting thread, in wait order.
    pub fn broadcast(&self) -> Result<(), SyncError> {
        let engine = self.rt.engine();
        let me = engine.me();
        engine.cancel_point(me);
        let result = self.core.broadcast(engine, me);
        engine.settle(me, result)
    }
}

/// Condition variable used with [`DetMutex`](crate::DetMutex) guards.
#[derive(Debug)]
pub struct DetCondvar {
    raw: RawDetCondvar,
}

impl DetCondvar {
    /// Create a condition variable with the next cond id of `rt`.
    pub fn new(rt: &Runtime) -> Self {
        Self {
            raw: RawDetCondvar::new(rt),
        }
    }

    /// Id assigned at creation.
    pub fn id(&self) -> CondId {
        self.raw.id()
    }

    /// Release the guard's mutex, wait for a signal, and return a guard for
    /// the reacquired mutex.
    pub fn wait<'a, T: ?Sized>(
        &self,
        guard: DetMutexGuard<'a, T>,
    ) -> Result<DetMutexGuard<'a, T>, SyncError> {
        let engine = self.raw.rt.engine();
        let me = engine.me();
        engine.cancel_point(me);

        let mutex = guard.into_mutex();
        match self.raw.core.wait(engine, me, mutex.raw().core()) {
            Ok(()) => Ok(DetMutexGuard::held(mutex)),
            Err(WaitError::Sync(e)) => Err(e),
            Err(WaitError::Cancelled) => engine.cancel_unwind(me),
        }
    }

    /// Wait until `condition` returns false.
    pub fn wait_while<'a, T: ?Sized, F>(
        &self,
        mut guard: DetMutexGuard<'a, T>,
        mut condition: F,
    ) -> Result<DetMutexGuard<'a, T>, SyncError>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.wait(guard)?;
        }
        Ok(guard)
    }

    /// Same as [`RawDetCondvar::signal`].
    pub fn signal(&self) -> Result<(), SyncError> {
        self.raw.signal()
    }

    /// Same as [`RawDetCondvar::broadcast`].
    pub fn broadcast(&self) -> Result<(), SyncError> {
        self.raw.broadcast()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::mutex::DetMutex;
    use lockstep_types::MutexId;

    fn runtime(threads: usize) -> Runtime {
        let rt = Runtime::init(RuntimeConfig::testing().with_max_threads(4)).unwrap();
        let engine = rt.engine();
        for i in 1..threads {
            engine.slot(ThreadId(i)).activate(LogicalTime(1_000));
            engine.add_active();
        }
        engine.set_max_thr(threads);
        rt
    }

    #[test]
    fn test_wait_requires_ownership() {
        let rt = runtime(1);
        let m = RawDetMutex::new(&rt);
        let cv = RawDetCondvar::new(&rt);
        assert_eq!(cv.wait(&m), Err(SyncError::NotOwner));
        assert_eq!(cv.wait_timeout(&m, Duration::from_millis(1)), Err(SyncError::NotOwner));
    }

    #[test]
    fn test_signal_without_waiters_is_noop() {
        let rt = runtime(1);
        let cv = DetCondvar::new(&rt);
        cv.signal().unwrap();
        cv.broadcast().unwrap();
        assert_eq!(rt.clock(), LogicalTime::ZERO);
        assert_eq!(cv.id(), CondId(1));
    }

    #[test]
    fn test_ordered_signal_hands_clock_to_waiter() {
        let rt = runtime(2);
        let engine = rt.engine();
        let core = CondCore::new(CondId(7), 4);
        core.queue
            .lock()
            .push(Waiter { id: ThreadId(1), ordered: true })
            .unwrap();
        engine.slot(ThreadId(1)).clock.set(LogicalTime::SUSPENDED);
        engine.slot(ThreadId(0)).clock.set(LogicalTime(10));

        core.signal(engine, ThreadId(0)).unwrap();
        assert_eq!(engine.slot(ThreadId(1)).clock.read(), LogicalTime(11));
        assert_eq!(rt.clock(), LogicalTime(11));
        assert_eq!(core.waiters(), 0);
        // The waiter's permit is available.
        engine.slot(ThreadId(1)).wake.wait();
    }

    #[test]
    fn test_unordered_waiter_keeps_its_clock() {
        let rt = runtime(2);
        let engine = rt.engine();
        let core = CondCore::new(CondId(7), 4);
        core.queue
            .lock()
            .push(Waiter { id: ThreadId(1), ordered: false })
            .unwrap();
        engine.slot(ThreadId(1)).clock.set(LogicalTime(3));
        engine.slot(ThreadId(0)).clock.set(LogicalTime(10));

        core.signal(engine, ThreadId(0)).unwrap();
        assert_eq!(engine.slot(ThreadId(1)).clock.read(), LogicalTime(3));
        assert_eq!(rt.clock(), LogicalTime(11));
    }

    #[test]
    fn test_broadcast_assigns_consecutive_clocks() {
        let rt = runtime(3);
        let engine = rt.engine();
        let core = CondCore::new(CondId(7), 4);
        for i in [2, 1] {
            core.queue
                .lock()
                .push(Waiter { id: ThreadId(i), ordered: true })
                .unwrap();
            engine.slot(ThreadId(i)).clock.set(LogicalTime::SUSPENDED);
        }
        engine.slot(ThreadId(0)).clock.set(LogicalTime(20));

        core.broadcast(engine, ThreadId(0)).unwrap();
        // Queue order, not id order.
        assert_eq!(engine.slot(ThreadId(2)).clock.read(), LogicalTime(21));
        assert_eq!(engine.slot(ThreadId(1)).clock.read(), LogicalTime(22));
        assert_eq!(rt.clock(), LogicalTime(22));
        assert_eq!(core.waiters(), 0);
    }

    #[test]
    fn test_guard_wait_without_lock_is_rejected() {
        // A guard always owns its mutex; the rejection path is the raw one.
        let rt = runtime(1);
        let m = DetMutex::new(&rt, 0u32);
        assert_eq!(m.id(), MutexId(1));
        let cv = RawDetCondvar::new(&rt);
        assert_eq!(cv.wait(m.raw()), Err(SyncError::NotOwner));
    }
}
