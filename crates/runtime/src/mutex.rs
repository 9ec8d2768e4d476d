//! Deterministic mutex.
//!
//! Acquisition order is decided by logical time, not by whoever wins the
//! physical lock:
//!
//! 1. The caller pauses its clock and waits for its turn (global minimum).
//! 2. It joins the mutex's FIFO queue; only the queue head may try the
//!    physical lock.
//! 3. A physical success can still be logically stale: if the previous owner
//!    released the lock at a logical time at or after the caller's turn, the
//!    lock was logically held when the caller asked. The caller gives the lock
//!    back and fast-forwards its clock to the release time.
//! 4. Every unsuccessful round advances the caller's clock by one and waits
//!    for the turn again.
//!
//! When the caller is not ordered (single thread, determinism switched off,
//! passthrough mode) the operations are plain OS mutex operations.

use crate::error::{SyncError, WaitError};
use crate::runtime::{Engine, Runtime};
use crate::turn::wait_for_turn;
use lockstep_types::{LogicalTime, MutexId, ThreadId, WaitQueue};
use parking_lot::lock_api::RawMutex as _;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tracing::warn;

const NO_OWNER: usize = usize::MAX;

/// Mutex state shared by the public wrappers and internal users.
pub(crate) struct MutexCore {
    id: MutexId,
    raw: parking_lot::RawMutex,
    queue: parking_lot::Mutex<WaitQueue<ThreadId>>,
    released: AtomicI64,
    last_owner: AtomicUsize,
    owner: AtomicUsize,
}

impl fmt::Debug for MutexCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexCore")
            .field("id", &self.id)
            .field("owner", &self.owner())
            .field("released", &self.released_at())
            .finish()
    }
}

impl MutexCore {
    pub(crate) fn new(id: MutexId, capacity: usize) -> Self {
        Self {
            id,
            raw: parking_lot::RawMutex::INIT,
            queue: parking_lot::Mutex::new(WaitQueue::with_capacity(capacity)),
            released: AtomicI64::new(0),
            last_owner: AtomicUsize::new(NO_OWNER),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    pub(crate) fn id(&self) -> MutexId {
        self.id
    }

    /// Current owner, if any.
    pub(crate) fn owner(&self) -> Option<ThreadId> {
        match self.owner.load(Ordering::SeqCst) {
            NO_OWNER => None,
            id => Some(ThreadId(id)),
        }
    }

    /// Previous owner, if any.
    pub(crate) fn last_owner(&self) -> Option<ThreadId> {
        match self.last_owner.load(Ordering::SeqCst) {
            NO_OWNER => None,
            id => Some(ThreadId(id)),
        }
    }

    /// Logical time of the most recent release.
    pub(crate) fn released_at(&self) -> LogicalTime {
        LogicalTime(self.released.load(Ordering::SeqCst))
    }

    fn owned_by(&self, me: ThreadId) -> bool {
        self.owner.load(Ordering::SeqCst) == me.index()
    }

    fn set_owner(&self, me: ThreadId) {
        self.owner.store(me.index(), Ordering::SeqCst);
        self.last_owner.store(me.index(), Ordering::SeqCst);
    }

    fn enqueue(&self, me: ThreadId) {
        if let Err(e) = self.queue.lock().push(me) {
            panic!("{}: waiter queue overflow for {me}: {e}", self.id);
        }
    }

    fn dequeue(&self, me: ThreadId) {
        self.queue.lock().remove(me);
    }

    fn is_head(&self, me: ThreadId) -> bool {
        self.queue.lock().head() == Some(me)
    }

    /// Physical release. Caller must hold the lock.
    fn release_raw(&self) {
        self.owner.store(NO_OWNER, Ordering::SeqCst);
        // SAFETY: only called by the owner, which holds `raw`.
        unsafe { self.raw.unlock() };
    }

    /// One physical attempt by the queue head, with the staleness check.
    ///
    /// Returns true if the lock is now owned. On a stale acquisition the lock
    /// is given back and the caller's clock is fast-forwarded.
    fn attempt(&self, engine: &Engine, me: ThreadId, turn: LogicalTime) -> bool {
        if !self.is_head(me) || !self.raw.try_lock() {
            return false;
        }
        let released = self.released_at();
        if released >= turn {
            // Physically free but logically still held at our turn.
            self.release_raw();
            engine.slot(me).clock.bump(released.since(turn));
            engine.event(3, me, format_args!("{} stale, released at {released}", self.id));
            return false;
        }
        self.set_owner(me);
        true
    }

    /// Acquire, blocking.
    pub(crate) fn lock(&self, engine: &Engine, me: ThreadId) -> Result<(), WaitError> {
        if self.owned_by(me) {
            return Err(SyncError::Deadlock.into());
        }
        if !engine.is_enabled(me) {
            self.raw.lock();
            self.set_owner(me);
            return Ok(());
        }

        let slot = engine.slot(me);
        let paused = engine.pause(me);
        engine.event(2, me, format_args!("acq({}) enter", self.id));

        let mut turn = match wait_for_turn(engine, me) {
            Ok(t) => t,
            Err(e) => {
                engine.resume(me, paused);
                return Err(e);
            }
        };
        self.enqueue(me);

        loop {
            if self.attempt(engine, me, turn) {
                break;
            }
            let interrupted = engine
                .ensure_finite(me, slot.clock.read())
                .and_then(|_| {
                    slot.clock.bump(1);
                    wait_for_turn(engine, me)
                });
            match interrupted {
                Ok(t) => turn = t,
                Err(e) => {
                    self.dequeue(me);
                    engine.resume(me, paused);
                    return Err(e);
                }
            }
        }

        let now = slot.clock.read();
        if let Err(e) = engine.ensure_finite(me, now) {
            self.dequeue(me);
            self.release_raw();
            engine.resume(me, paused);
            return Err(e);
        }
        engine.event(1, me, format_args!("acq({})", self.id));
        engine.record_sync(now);
        self.dequeue(me);
        slot.clock.bump(1);
        engine.resume(me, paused);
        slot.stats.record_lock();
        Ok(())
    }

    /// Single acquisition attempt.
    pub(crate) fn try_lock(&self, engine: &Engine, me: ThreadId) -> Result<(), WaitError> {
        if self.owned_by(me) {
            return Err(SyncError::Busy.into());
        }
        if !engine.is_enabled(me) {
            if !self.raw.try_lock() {
                return Err(SyncError::Busy.into());
            }
            self.set_owner(me);
            return Ok(());
        }

        let slot = engine.slot(me);
        let paused = engine.pause(me);
        engine.event(1, me, format_args!("trylock({})", self.id));

        let turn = match wait_for_turn(engine, me) {
            Ok(t) => t,
            Err(e) => {
                engine.resume(me, paused);
                return Err(e);
            }
        };
        self.enqueue(me);
        let acquired = self.attempt(engine, me, turn);

        let now = slot.clock.read();
        if let Err(e) = engine.ensure_finite(me, now) {
            self.dequeue(me);
            if acquired {
                self.release_raw();
            }
            engine.resume(me, paused);
            return Err(e);
        }
        engine.record_sync(now);
        self.dequeue(me);
        slot.clock.bump(1);
        engine.resume(me, paused);

        if acquired {
            slot.stats.record_lock();
            engine.event(1, me, format_args!("trylock acq({})", self.id));
            Ok(())
        } else {
            engine.event(1, me, format_args!("trylock fail({})", self.id));
            Err(SyncError::Busy.into())
        }
    }

    /// Release.
    ///
    /// Never blocks and never unwinds, so it is safe to call from drop
    /// handlers during a cancellation unwind.
    pub(crate) fn unlock(&self, engine: &Engine, me: ThreadId) -> Result<(), SyncError> {
        if !self.owned_by(me) {
            return Err(SyncError::NotOwner);
        }
        if !engine.is_enabled(me) {
            self.release_raw();
            return Ok(());
        }

        let slot = engine.slot(me);
        let paused = engine.pause(me);
        let now = slot.clock.read();
        if now.is_sentinel() {
            // Cancelled or retired while holding the lock.
            warn!(thread = %me, mutex = %self.id, "Releasing mutex from a retired clock");
            self.release_raw();
            engine.resume(me, paused);
            return Ok(());
        }

        self.released.store(now.get(), Ordering::SeqCst);
        engine.event(1, me, format_args!("rel({})", self.id));
        engine.record_sync(now);
        self.release_raw();
        slot.clock.bump(1);
        engine.resume(me, paused);
        Ok(())
    }

    /// Release on behalf of a condition wait.
    ///
    /// The caller has already parked its clock at the suspension sentinel;
    /// `at` is the clock it had before. No clock bump: the signaler assigns
    /// the waiter's next clock.
    pub(crate) fn release_for_wait(
        &self,
        engine: &Engine,
        me: ThreadId,
        ordered: bool,
        at: LogicalTime,
    ) {
        if ordered {
            self.released.store(at.get(), Ordering::SeqCst);
            engine.record_sync(at);
            engine.event(1, me, format_args!("rel({}) for wait", self.id));
        }
        self.release_raw();
    }

    pub(crate) fn check_owner(&self, me: ThreadId) -> Result<(), SyncError> {
        if self.owned_by(me) {
            Ok(())
        } else {
            Err(SyncError::NotOwner)
        }
    }
}

/// Deterministic mutex without data, with explicit lock and unlock calls.
#[derive(Debug)]
pub struct RawDetMutex {
    rt: Runtime,
    core: MutexCore,
}

impl RawDetMutex {
    /// Create a mutex bound to `rt`.
    pub fn new(rt: &Runtime) -> Self {
        let engine = rt.engine();
        let core = MutexCore::new(engine.next_mutex_id(), engine.registry.capacity());
        engine.event(1, engine.me(), format_args!("mutex_init({})", core.id()));
        Self {
            rt: rt.clone(),
            core,
        }
    }

    /// Mutex id.
    pub fn id(&self) -> MutexId {
        self.core.id()
    }

    /// Thread that last acquired the mutex.
    pub fn last_owner(&self) -> Option<ThreadId> {
        self.core.last_owner()
    }

    /// Acquire, blocking in logical-time order.
    pub fn lock(&self) -> Result<(), SyncError> {
        let engine = self.rt.engine();
        let me = engine.me();
        engine.cancel_point(me);
        let result = self.core.lock(engine, me);
        engine.settle(me, result)
    }

    /// Try once; `Err(SyncError::Busy)` if the mutex is held physically or
    /// logically.
    pub fn try_lock(&self) -> Result<(), SyncError> {
        let engine = self.rt.engine();
        let me = engine.me();
        engine.cancel_point(me);
        let result = self.core.try_lock(engine, me);
        engine.settle(me, result)
    }

    /// Release.
    pub fn unlock(&self) -> Result<(), SyncError> {
        let engine = self.rt.engine();
        self.core.unlock(engine, engine.me())
    }

    pub(crate) fn core(&self) -> &MutexCore {
        &self.core
    }
}

/// Deterministic mutex protecting a value.
pub struct DetMutex<T: ?Sized> {
    raw: RawDetMutex,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `raw`.
unsafe impl<T: ?Sized + Send> Send for DetMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for DetMutex<T> {}

impl<T> DetMutex<T> {
    /// Create a mutex bound to `rt` holding `value`.
    pub fn new(rt: &Runtime, value: T) -> Self {
        Self {
            raw: RawDetMutex::new(rt),
            data: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex and return the value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> DetMutex<T> {
    /// Mutex id.
    pub fn id(&self) -> MutexId {
        self.raw.id()
    }

    /// Acquire, blocking in logical-time order.
    pub fn lock(&self) -> Result<DetMutexGuard<'_, T>, SyncError> {
        self.raw.lock()?;
        Ok(DetMutexGuard { mutex: self })
    }

    /// Try once.
    pub fn try_lock(&self) -> Result<DetMutexGuard<'_, T>, SyncError> {
        self.raw.try_lock()?;
        Ok(DetMutexGuard { mutex: self })
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub(crate) fn raw(&self) -> &RawDetMutex {
        &self.raw
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for DetMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetMutex").field("id", &self.id()).finish_non_exhaustive()
    }
}

/// RAII guard; unlocks on drop.
#[must_use = "if unused the mutex will immediately unlock"]
pub struct DetMutexGuard<'a, T: ?Sized> {
    mutex: &'a DetMutex<T>,
}

impl<'a, T: ?Sized> DetMutexGuard<'a, T> {
    /// Give up the guard without unlocking. Returns the mutex.
    pub(crate) fn into_mutex(self) -> &'a DetMutex<T> {
        let mutex = self.mutex;
        std::mem::forget(self);
        mutex
    }

    /// Rebuild a guard for a mutex the caller holds.
    pub(crate) fn held(mutex: &'a DetMutex<T>) -> Self {
        Self { mutex }
    }
}

impl<T: ?Sized> Deref for DetMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for DetMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard proves the lock is held.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for DetMutexGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.raw.unlock() {
            warn!(mutex = %self.mutex.id(), error = %e, "Guard failed to unlock mutex");
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for DetMutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use tracing_test::traced_test;

    fn runtime() -> Runtime {
        Runtime::init(RuntimeConfig::testing().with_max_threads(4)).unwrap()
    }

    #[traced_test]
    #[test]
    fn test_single_thread_is_passthrough() {
        let rt = runtime();
        let m = RawDetMutex::new(&rt);
        m.lock().unwrap();
        assert_eq!(m.lock(), Err(SyncError::Deadlock));
        assert_eq!(m.try_lock(), Err(SyncError::Busy));
        m.unlock().unwrap();
        assert_eq!(m.unlock(), Err(SyncError::NotOwner));
        // Passthrough operations leave the clock alone.
        assert_eq!(rt.clock(), LogicalTime::ZERO);
        assert_eq!(m.last_owner(), Some(ThreadId::MASTER));
    }

    #[test]
    fn test_guard_unlocks_on_drop() {
        let rt = runtime();
        let m = DetMutex::new(&rt, 5);
        {
            let mut g = m.lock().unwrap();
            *g += 1;
        }
        assert_eq!(*m.try_lock().unwrap(), 6);
        assert_eq!(m.into_inner(), 6);
    }

    #[test]
    fn test_mutex_ids_increase() {
        let rt = runtime();
        let a = RawDetMutex::new(&rt);
        let b = DetMutex::new(&rt, ());
        assert_eq!(a.id(), MutexId(1));
        assert_eq!(b.id(), MutexId(2));
    }

    /// Drive the core directly with hand-set clocks, as if two threads were
    /// registered.
    fn two_thread_engine() -> Runtime {
        let rt = runtime();
        let engine = rt.engine();
        engine.slot(ThreadId(1)).activate(LogicalTime(1_000));
        engine.set_max_thr(2);
        engine.add_active();
        rt
    }

    #[test]
    fn test_ordered_lock_advances_clock_and_last_sync() {
        let rt = two_thread_engine();
        let engine = rt.engine();
        let core = MutexCore::new(MutexId(9), 4);
        engine.slot(ThreadId(0)).clock.set(LogicalTime(10));

        core.lock(engine, ThreadId(0)).unwrap();
        // Fresh mutex has release time 0 < 10: acquired on the first attempt.
        assert_eq!(engine.last_sync(), LogicalTime(10));
        assert_eq!(rt.clock(), LogicalTime(11));

        core.unlock(engine, ThreadId(0)).unwrap();
        assert_eq!(core.released_at(), LogicalTime(11));
        assert_eq!(engine.last_sync(), LogicalTime(11));
        assert_eq!(rt.clock(), LogicalTime(12));
    }

    #[test]
    fn test_stale_acquisition_fast_forwards() {
        let rt = two_thread_engine();
        let engine = rt.engine();
        let core = MutexCore::new(MutexId(9), 4);

        // Thread 1 released the mutex at logical time 50, but thread 0
        // asks at 20. The physical lock is free, the logical one is not.
        core.released.store(50, Ordering::SeqCst);
        engine.slot(ThreadId(0)).clock.set(LogicalTime(20));

        core.lock(engine, ThreadId(0)).unwrap();
        // Fast-forward 30 to 50, bump to 51, acquire at 51, bump to 52.
        assert_eq!(engine.last_sync(), LogicalTime(51));
        assert_eq!(rt.clock(), LogicalTime(52));
        core.unlock(engine, ThreadId(0)).unwrap();
    }

    #[test]
    fn test_try_lock_stale_reports_busy_and_fast_forwards() {
        let rt = two_thread_engine();
        let engine = rt.engine();
        let core = MutexCore::new(MutexId(9), 4);
        core.released.store(50, Ordering::SeqCst);
        engine.slot(ThreadId(0)).clock.set(LogicalTime(20));

        assert_eq!(
            core.try_lock(engine, ThreadId(0)),
            Err(WaitError::Sync(SyncError::Busy))
        );
        // Fast-forward to 50, then the unconditional bump.
        assert_eq!(rt.clock(), LogicalTime(51));
        assert_eq!(core.owner(), None);
        assert!(core.queue.lock().is_empty());

        assert_eq!(core.try_lock(engine, ThreadId(0)), Ok(()));
        assert_eq!(engine.last_sync(), LogicalTime(51));
        core.unlock(engine, ThreadId(0)).unwrap();
    }

    #[test]
    fn test_try_lock_physically_held_is_busy() {
        let rt = two_thread_engine();
        let engine = rt.engine();
        let core = MutexCore::new(MutexId(9), 4);
        // Thread 1 holds it physically.
        assert!(core.raw.try_lock());
        core.set_owner(ThreadId(1));
        engine.slot(ThreadId(0)).clock.set(LogicalTime(5));

        assert_eq!(
            core.try_lock(engine, ThreadId(0)),
            Err(WaitError::Sync(SyncError::Busy))
        );
        assert_eq!(rt.clock(), LogicalTime(6));
        core.release_raw();
    }
}
