//! Runtime handle and shared engine state.
//!
//! # Architecture
//!
//! ```text
//! Runtime (Arc<Engine>) ── cloned into every primitive and thread
//!   │
//!   └─ Engine
//!        ├─ Registry: ThreadSlot[max_threads]  (clock, lifecycle, stats, log)
//!        ├─ max_thr / num_thr                  (created / active threads)
//!        ├─ last_sync                          (clock of the latest sync op)
//!        └─ id counters                        (mutex / cond / barrier)
//! ```
//!
//! Every thread that uses a runtime is registered in it: the master thread by
//! [`Runtime::init`], workers by [`Runtime::spawn`]. Registration is recorded
//! in a thread-local, so primitives find the caller's slot without taking an
//! id argument. Calling into a runtime from an unregistered thread is a
//! protocol violation and panics.

use crate::config::{ExecutionMode, RuntimeConfig};
use crate::error::{RuntimeError, SyncError, WaitError};
use crate::registry::{Registry, ThreadSlot};
use lockstep_clock::{ClockError, CounterError, EventCounter};
use lockstep_types::{BarrierId, CondId, LogicalTime, MutexId, ThreadId};
use std::cell::Cell;
use std::fmt;
#[cfg(test)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static NEXT_RUNTIME_UID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static MEMBERSHIP: Cell<Option<(u64, ThreadId)>> = const { Cell::new(None) };
}

/// Register the calling OS thread as `id` of runtime `uid`.
pub(crate) fn enter(uid: u64, id: ThreadId) {
    MEMBERSHIP.with(|m| m.set(Some((uid, id))));
}

/// Forget the calling thread's registration.
pub(crate) fn leave() {
    MEMBERSHIP.with(|m| m.set(None));
}

/// Unwind payload used to stop a cancelled thread.
pub(crate) struct CancelUnwind;

/// State shared by every handle, primitive and thread of one runtime.
pub(crate) struct Engine {
    uid: u64,
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: Registry,
    max_thr: AtomicUsize,
    num_thr: AtomicUsize,
    last_sync: AtomicI64,
    debug_level: AtomicU8,
    next_mutex: AtomicU32,
    next_cond: AtomicU32,
    next_barrier: AtomicU32,
    pub(crate) spawn_lock: parking_lot::Mutex<()>,
    /// Make every worker's counter open fail.
    #[cfg(test)]
    pub(crate) fail_child_counters: AtomicBool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("uid", &self.uid)
            .field("mode", &self.config.mode)
            .field("max_thr", &self.max_thr())
            .field("num_thr", &self.num_thr())
            .finish()
    }
}

impl Engine {
    fn new(config: RuntimeConfig) -> Self {
        Self {
            uid: NEXT_RUNTIME_UID.fetch_add(1, Ordering::Relaxed),
            registry: Registry::new(config.max_threads),
            debug_level: AtomicU8::new(config.debug_level),
            config,
            max_thr: AtomicUsize::new(0),
            num_thr: AtomicUsize::new(0),
            last_sync: AtomicI64::new(0),
            next_mutex: AtomicU32::new(0),
            next_cond: AtomicU32::new(0),
            next_barrier: AtomicU32::new(0),
            spawn_lock: parking_lot::Mutex::new(()),
            #[cfg(test)]
            fail_child_counters: AtomicBool::new(false),
        }
    }

    /// Open the event counter that will drive `id`'s clock, on the calling
    /// thread.
    pub(crate) fn open_counter(&self, id: ThreadId) -> Result<Box<dyn EventCounter>, CounterError> {
        #[cfg(test)]
        if id != ThreadId::MASTER && self.fail_child_counters.load(Ordering::SeqCst) {
            return Err(CounterError::Unsupported);
        }
        debug!(thread = %id, source = ?self.config.counter, "Opening event counter");
        self.config.counter.open()
    }

    pub(crate) fn uid(&self) -> u64 {
        self.uid
    }

    /// Id of the calling thread.
    ///
    /// # Panics
    ///
    /// If the calling thread is not registered with this runtime.
    pub(crate) fn me(&self) -> ThreadId {
        match MEMBERSHIP.with(|m| m.get()) {
            Some((uid, id)) if uid == self.uid => id,
            _ => panic!(
                "thread {:?} is not registered with this lockstep runtime",
                std::thread::current().name().unwrap_or("<unnamed>")
            ),
        }
    }

    pub(crate) fn slot(&self, id: ThreadId) -> &ThreadSlot {
        self.registry.get(id)
    }

    /// Number of thread ids handed out.
    pub(crate) fn max_thr(&self) -> usize {
        self.max_thr.load(Ordering::SeqCst)
    }

    pub(crate) fn set_max_thr(&self, n: usize) {
        self.max_thr.store(n, Ordering::SeqCst);
    }

    /// Number of threads not yet joined.
    pub(crate) fn num_thr(&self) -> usize {
        self.num_thr.load(Ordering::SeqCst)
    }

    pub(crate) fn add_active(&self) -> usize {
        self.num_thr.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn remove_active(&self) -> usize {
        self.num_thr.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn deterministic(&self) -> bool {
        self.config.mode == ExecutionMode::Deterministic
    }

    /// Whether `id` currently takes part in ordering.
    pub(crate) fn is_enabled(&self, id: ThreadId) -> bool {
        self.deterministic() && self.num_thr() > 1 && self.slot(id).det_enabled()
    }

    /// Stop `id`'s clock. Returns true if it was running.
    pub(crate) fn pause(&self, id: ThreadId) -> bool {
        self.slot(id).clock.disable().is_ok()
    }

    /// Restart `id`'s clock if `paused` says it was running.
    pub(crate) fn resume(&self, id: ThreadId, paused: bool) {
        if paused {
            let _ = self.slot(id).clock.enable(0);
        }
    }

    /// Clock of `id` as seen by the calling thread `me`.
    pub(crate) fn clock_of(&self, me: ThreadId, id: ThreadId) -> LogicalTime {
        let cell = &self.slot(id).clock;
        if me == id {
            cell.read()
        } else {
            cell.read_remote()
        }
    }

    pub(crate) fn record_sync(&self, time: LogicalTime) {
        self.last_sync.store(time.get(), Ordering::SeqCst);
    }

    pub(crate) fn last_sync(&self) -> LogicalTime {
        LogicalTime(self.last_sync.load(Ordering::SeqCst))
    }

    /// Check that `time` is a real clock value at a synchronization point.
    ///
    /// A sentinel here means either the thread was cancelled (its clock was
    /// retired from outside) or the protocol is broken.
    pub(crate) fn ensure_finite(&self, me: ThreadId, time: LogicalTime) -> Result<(), WaitError> {
        if time.is_finite() {
            return Ok(());
        }
        if self.slot(me).is_cancel_requested() {
            return Err(WaitError::Cancelled);
        }
        panic!("{me}: logical clock reached the suspension sentinel ({time}) at a synchronization point");
    }

    /// Unwind the calling thread if it has been cancelled.
    pub(crate) fn cancel_point(&self, me: ThreadId) {
        if self.slot(me).is_cancel_requested() {
            self.cancel_unwind(me);
        }
    }

    pub(crate) fn cancel_unwind(&self, me: ThreadId) -> ! {
        assert!(!me.is_master(), "the master thread cannot be cancelled");
        self.event(1, me, format_args!("cancelled"));
        std::panic::resume_unwind(Box::new(CancelUnwind))
    }

    /// Turn an internal wait result into the public one, unwinding on cancel.
    pub(crate) fn settle<T>(&self, me: ThreadId, result: Result<T, WaitError>) -> Result<T, SyncError> {
        match result {
            Ok(v) => Ok(v),
            Err(WaitError::Sync(e)) => Err(e),
            Err(WaitError::Cancelled) => self.cancel_unwind(me),
        }
    }

    pub(crate) fn next_mutex_id(&self) -> MutexId {
        MutexId(self.next_mutex.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn next_cond_id(&self) -> CondId {
        CondId(self.next_cond.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn next_barrier_id(&self) -> BarrierId {
        BarrierId(self.next_barrier.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn counts(&self) -> (u32, u32, u32) {
        (
            self.next_mutex.load(Ordering::Relaxed),
            self.next_cond.load(Ordering::Relaxed),
            self.next_barrier.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn debug_level(&self) -> u8 {
        self.debug_level.load(Ordering::Relaxed)
    }

    pub(crate) fn set_debug_level(&self, level: u8) {
        self.debug_level.store(level, Ordering::Relaxed);
    }

    /// Emit a runtime event at `level` for thread `me`.
    ///
    /// Goes to the thread's log file when one is open, `tracing` otherwise.
    pub(crate) fn event(&self, level: u8, me: ThreadId, args: fmt::Arguments<'_>) {
        if level > self.debug_level() {
            return;
        }
        let slot = self.slot(me);
        let clock = slot.clock.read();
        if slot.log.is_open() {
            slot.log
                .write_line(&format!("[LT:{:08}][{:2}]{}", clock.get(), me.index(), args));
        } else {
            debug!(thread = %me, clock = clock.get(), "{}", args);
        }
    }
}

/// Handle to a deterministic runtime.
///
/// Cheap to clone; all clones share one engine.
#[derive(Debug, Clone)]
pub struct Runtime {
    engine: Arc<Engine>,
}

impl Runtime {
    /// Create a runtime and register the calling thread as its master (id 0).
    ///
    /// Environment overrides (`LOCKSTEP_*`) are applied on top of `config`.
    /// A thread belongs to one runtime at a time; initializing another
    /// runtime on the same thread moves its registration.
    pub fn init(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let config = config.with_env_overrides();
        config.validate()?;

        let engine = Arc::new(Engine::new(config));
        let master = engine.slot(ThreadId::MASTER);
        master.activate(LogicalTime::ZERO);
        master.clock.attach(engine.open_counter(ThreadId::MASTER)?);
        if let Some(prefix) = &engine.config.log_file {
            master.log.open(prefix, ThreadId::MASTER)?;
        }
        master.started.store(true, Ordering::SeqCst);

        engine.set_max_thr(1);
        engine.add_active();
        enter(engine.uid(), ThreadId::MASTER);

        info!(
            mode = ?engine.config.mode,
            counter = ?engine.config.counter,
            max_threads = engine.config.max_threads,
            debug_level = engine.config.debug_level,
            "Lockstep runtime initialized"
        );
        Ok(Self { engine })
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn engine_arc(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Configuration in effect (after environment overrides).
    pub fn config(&self) -> &RuntimeConfig {
        &self.engine.config
    }

    /// Execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.engine.config.mode
    }

    /// Id of the calling thread.
    pub fn current_id(&self) -> ThreadId {
        self.engine.me()
    }

    /// Threads created so far, including the master.
    pub fn created_threads(&self) -> usize {
        self.engine.max_thr()
    }

    /// Threads not yet joined, including the master.
    pub fn active_threads(&self) -> usize {
        self.engine.num_thr()
    }

    /// Logical time of the most recent synchronization operation.
    pub fn last_sync(&self) -> LogicalTime {
        self.engine.last_sync()
    }

    /// Whether the calling thread's operations are currently ordered.
    pub fn is_enabled(&self) -> bool {
        let me = self.engine.me();
        self.engine.is_enabled(me)
    }

    /// Turn determinism back on for the calling thread.
    ///
    /// The clock resumes from where [`disable`](Self::disable) left it.
    ///
    /// # Panics
    ///
    /// If determinism is already on for this thread.
    pub fn enable(&self) {
        let me = self.engine.me();
        let slot = self.engine.slot(me);
        assert!(!slot.det_enabled(), "{me}: determinism is already enabled");
        let saved = slot.switch_on();
        slot.clock.set(saved);
        let _ = slot.clock.enable(0);
        self.engine.event(1, me, format_args!("determinism enabled"));
    }

    /// Take the calling thread out of ordering.
    ///
    /// Its clock is parked at the suspension sentinel so other threads stop
    /// waiting for it, and its primitives behave like plain OS ones.
    ///
    /// # Panics
    ///
    /// If determinism is already off for this thread.
    pub fn disable(&self) {
        let me = self.engine.me();
        let slot = self.engine.slot(me);
        assert!(slot.det_enabled(), "{me}: determinism is already disabled");
        let _ = slot.clock.disable();
        let saved = slot.clock.read();
        slot.clock.set(LogicalTime::SUSPENDED);
        slot.switch_off(saved);
        self.engine.event(1, me, format_args!("determinism disabled at {saved}"));
    }

    /// Current logical time of the calling thread.
    pub fn clock(&self) -> LogicalTime {
        let me = self.engine.me();
        let paused = self.engine.pause(me);
        let now = self.engine.slot(me).clock.read();
        self.engine.resume(me, paused);
        now
    }

    /// Record `events` on the calling thread's software counter.
    ///
    /// Events count only while the clock is running. This is also a
    /// cancellation point.
    pub fn tick(&self, events: u64) {
        let me = self.engine.me();
        self.engine.cancel_point(me);
        self.engine.slot(me).clock.tick(events);
    }

    /// Resume counting after adding `increment` to the clock.
    pub fn enable_clock(&self, increment: i64) -> Result<(), ClockError> {
        let me = self.ordered_caller()?;
        self.engine.slot(me).clock.enable(increment)
    }

    /// Stop counting events on the calling thread.
    pub fn disable_clock(&self) -> Result<(), ClockError> {
        let me = self.ordered_caller()?;
        self.engine.slot(me).clock.disable()
    }

    /// Add `increment` to the calling thread's clock.
    pub fn increase_clock(&self, increment: i64) -> Result<(), ClockError> {
        let me = self.ordered_caller()?;
        self.engine.slot(me).clock.bump(increment);
        Ok(())
    }

    /// Leave ordering before an inherently non-deterministic wait.
    ///
    /// Records the current clock and parks it at the suspension sentinel.
    /// Pair with [`adjust_clock`](Self::adjust_clock).
    pub fn exit_clock(&self) -> Result<(), ClockError> {
        let me = self.ordered_caller()?;
        let paused = self.engine.pause(me);
        let at = self.engine.slot(me).clock.exit();
        self.engine.resume(me, paused);
        self.engine.event(2, me, format_args!("exit clock at {at}"));
        Ok(())
    }

    /// Rejoin ordering after a non-deterministic wait.
    ///
    /// Catches up to the later of the last synchronization anywhere and this
    /// thread's exit point. Catching up to another thread's synchronization
    /// means the wake-up time was not reproducible; it is counted as a
    /// non-deterministic event.
    pub fn adjust_clock(&self) -> Result<(), ClockError> {
        let me = self.ordered_caller()?;
        let slot = self.engine.slot(me);
        let last_sync = self.engine.last_sync();
        let last_exit = slot.clock.last_exit();

        let paused = self.engine.pause(me);
        if last_sync > last_exit {
            slot.clock.set(last_sync);
            slot.stats.record_nondet();
            self.engine
                .event(2, me, format_args!("adjusted to last sync {last_sync}"));
        } else {
            slot.clock.set(last_exit);
        }
        self.engine.resume(me, paused);
        Ok(())
    }

    /// Set the runtime event verbosity.
    pub fn set_debug_level(&self, level: u8) {
        self.engine.set_debug_level(level);
    }

    /// Current runtime event verbosity.
    pub fn debug_level(&self) -> u8 {
        self.engine.debug_level()
    }

    fn ordered_caller(&self) -> Result<ThreadId, ClockError> {
        let me = self.engine.me();
        if self.engine.is_enabled(me) {
            Ok(me)
        } else {
            Err(ClockError::DeterminismOff)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn runtime() -> Runtime {
        Runtime::init(RuntimeConfig::testing().with_max_threads(4)).unwrap()
    }

    #[test]
    fn test_init_registers_master() {
        let rt = runtime();
        assert_eq!(rt.current_id(), ThreadId::MASTER);
        assert_eq!(rt.created_threads(), 1);
        assert_eq!(rt.active_threads(), 1);
        assert_eq!(rt.clock(), LogicalTime::ZERO);
        // A lone thread is never ordered.
        assert!(!rt.is_enabled());
    }

    #[test]
    fn test_clock_api_requires_ordering() {
        let rt = runtime();
        assert_eq!(rt.enable_clock(1), Err(ClockError::DeterminismOff));
        assert_eq!(rt.disable_clock(), Err(ClockError::DeterminismOff));
        assert_eq!(rt.increase_clock(1), Err(ClockError::DeterminismOff));
        assert_eq!(rt.exit_clock(), Err(ClockError::DeterminismOff));
        assert_eq!(rt.adjust_clock(), Err(ClockError::DeterminismOff));
    }

    #[test]
    fn test_unregistered_thread_panics() {
        let rt = runtime();
        let result = std::thread::spawn(move || rt.current_id()).join();
        assert!(result.is_err());
    }

    #[test]
    fn test_init_moves_registration() {
        let first = runtime();
        let second = runtime();
        assert_eq!(second.current_id(), ThreadId::MASTER);
        let stale = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| first.current_id()));
        assert!(stale.is_err());
    }

    #[test]
    fn test_disable_twice_panics() {
        let rt = runtime();
        rt.disable();
        assert_eq!(rt.clock(), LogicalTime::SUSPENDED);
        let again = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| rt.disable()));
        assert!(again.is_err());
        rt.enable();
        assert_eq!(rt.clock(), LogicalTime::ZERO);
        let again = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| rt.enable()));
        assert!(again.is_err());
    }

    #[test]
    fn test_ids_are_allocated_in_order() {
        let rt = runtime();
        let engine = rt.engine();
        assert_eq!(engine.next_mutex_id(), MutexId(1));
        assert_eq!(engine.next_mutex_id(), MutexId(2));
        assert_eq!(engine.next_cond_id(), CondId(1));
        assert_eq!(engine.next_barrier_id(), BarrierId(1));
        assert_eq!(engine.counts(), (2, 1, 1));
    }
}
