//! Thread lifecycle: spawn, join, exit and cancel.
//!
//! Each worker owns a slot in the registry. The slot's lifecycle mutex and
//! condition variable carry two handshakes, both ordered by logical time:
//!
//! ```text
//! creator                      worker                       joiner
//!   wait_for_turn
//!   allocate id, child clock
//!   spawn OS thread ────────▶  pin, open counter
//!   wait(started) ◀─────────── signal(started)
//!                              run closure
//!                              signal(finished) ─────────▶ wait(finished)
//!                              retire clock                 OS join
//! ```
//!
//! Exit and cancellation are unwinds caught by the worker's entry wrapper.
//! `exit(value)` unwinds with the value as payload; a cancelled thread unwinds
//! from its next synchronization call.

use crate::error::{JoinError, RuntimeError, WaitError};
use crate::registry::ThreadSlot;
use crate::runtime::{enter, leave, CancelUnwind, Engine, Runtime};
use crate::turn::wait_for_turn;
use lockstep_types::{LogicalTime, ThreadId};
use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Unwind payload carrying the value passed to [`Runtime::exit`].
struct ExitRequest<T>(T);

/// How a worker's closure ended.
#[derive(Debug)]
enum Outcome<T> {
    Returned(T),
    Panicked(String),
    Cancelled,
    NotStarted,
}

/// Owned handle to a runtime thread.
///
/// Dropping the handle without joining detaches the OS thread; its slot
/// still retires normally when the closure ends.
#[derive(Debug)]
pub struct JoinHandle<T> {
    id: ThreadId,
    rt: Runtime,
    inner: Option<std::thread::JoinHandle<Outcome<T>>>,
}

impl<T> JoinHandle<T> {
    /// Runtime id of the thread.
    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    /// Wait for the thread to finish and return its value.
    pub fn join(mut self) -> Result<T, JoinError> {
        let engine = self.rt.engine();
        let me = engine.me();
        engine.cancel_point(me);

        let paused = engine.pause(me);
        let target = engine.slot(self.id);
        if let Err(WaitError::Cancelled) = wait_flag(engine, me, target, &target.finished) {
            engine.resume(me, paused);
            engine.cancel_unwind(me);
        }

        let outcome = match self.inner.take().map(|h| h.join()) {
            Some(Ok(outcome)) => outcome,
            Some(Err(payload)) => Outcome::Panicked(panic_message(payload.as_ref())),
            None => Outcome::NotStarted,
        };
        let remaining = engine.remove_active();
        engine.resume(me, paused);
        if remaining <= 1 {
            let _ = engine.slot(me).clock.disable();
        }
        engine.event(1, me, format_args!("joined {}", self.id));

        let thread = self.id;
        match outcome {
            Outcome::Returned(value) => Ok(value),
            Outcome::Panicked(message) => Err(JoinError::Panicked { thread, message }),
            Outcome::Cancelled => Err(JoinError::Cancelled { thread }),
            Outcome::NotStarted => Err(JoinError::NotStarted { thread }),
        }
    }

    /// Request cancellation. See [`Runtime::cancel`].
    pub fn cancel(&self) {
        self.rt.cancel(self);
    }
}

impl Runtime {
    /// Create a thread running `f` under deterministic ordering.
    ///
    /// The child starts with the creator's logical clock plus one. Returns
    /// once the child has registered and opened its counter.
    pub fn spawn<F, T>(&self, f: F) -> Result<JoinHandle<T>, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine();
        let me = engine.me();
        engine.cancel_point(me);

        let det = engine.deterministic();
        let own = engine.slot(me);
        if det && engine.num_thr() <= 1 {
            // Second active thread: ordering starts now.
            let _ = own.clock.enable(0);
        }
        let paused = engine.pause(me);

        let start = if det && own.det_enabled() {
            match wait_for_turn(engine, me) {
                Ok(t) => t,
                Err(_) => {
                    engine.resume(me, paused);
                    engine.cancel_unwind(me);
                }
            }
        } else {
            engine.last_sync()
        };

        let id = {
            let _creating = engine.spawn_lock.lock();
            let id = ThreadId(engine.max_thr());
            let capacity = engine.registry.capacity();
            if id.index() >= capacity {
                engine.resume(me, paused);
                return Err(RuntimeError::ThreadTableFull { capacity });
            }
            let child = engine.slot(id);
            child.activate(start.next());
            if let Some(prefix) = &engine.config.log_file {
                if let Err(e) = child.log.open(prefix, id) {
                    engine.resume(me, paused);
                    return Err(e);
                }
            }
            engine.set_max_thr(id.index() + 1);
            engine.add_active();
            id
        };
        engine.event(1, me, format_args!("create {id} at {}", start.next()));

        let worker_engine = Arc::clone(self.engine_arc());
        let spawned = std::thread::Builder::new()
            .name(format!("lockstep-{}", id.index()))
            .spawn(move || worker_main(worker_engine, id, f));
        let os_handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                let child = engine.slot(id);
                child.finished.store(true, Ordering::SeqCst);
                child.clock.retire();
                child.log.close();
                engine.remove_active();
                engine.resume(me, paused);
                return Err(RuntimeError::Spawn(e));
            }
        };

        let child = engine.slot(id);
        if let Err(WaitError::Cancelled) = wait_flag(engine, me, child, &child.started) {
            engine.resume(me, paused);
            engine.cancel_unwind(me);
        }
        engine.resume(me, paused);

        let start_error = child.start_error.lock().take();
        if let Some(e) = start_error {
            let _ = os_handle.join();
            if engine.remove_active() <= 1 {
                let _ = own.clock.disable();
            }
            return Err(RuntimeError::Counter(e));
        }

        Ok(JoinHandle {
            id,
            rt: self.clone(),
            inner: Some(os_handle),
        })
    }

    /// Wait for `handle`'s thread. Same as [`JoinHandle::join`].
    pub fn join<T>(&self, handle: JoinHandle<T>) -> Result<T, JoinError> {
        handle.join()
    }

    /// End the calling worker thread with `value`, as if its closure had
    /// returned it.
    ///
    /// `T` must be the thread's return type; any other type is reported to
    /// the joiner as a panic.
    ///
    /// # Panics
    ///
    /// On the master thread.
    pub fn exit<T: Send + 'static>(&self, value: T) -> ! {
        let me = self.engine().me();
        assert!(!me.is_master(), "exit called on the master thread");
        self.engine().event(1, me, format_args!("exit"));
        resume_unwind(Box::new(ExitRequest(value)))
    }

    /// Cancel `handle`'s thread, best effort.
    ///
    /// The joiner is released immediately and the target's clock is retired,
    /// so it no longer holds back ordering. The target itself stops at its
    /// next synchronization call or [`tick`](Runtime::tick), or right away if
    /// it is blocked in a condition wait. Locks it holds through a guard are
    /// released as it unwinds; a [`RawDetMutex`](crate::RawDetMutex) it
    /// locked by hand stays locked.
    pub fn cancel<T>(&self, handle: &JoinHandle<T>) {
        let engine = self.engine();
        let me = engine.me();
        let paused = engine.pause(me);
        let target = engine.slot(handle.id);

        if let Err(WaitError::Cancelled) = raise_flag(engine, me, target, &target.finished) {
            engine.resume(me, paused);
            engine.cancel_unwind(me);
        }
        target.cancel_requested.store(true, Ordering::SeqCst);
        target.wake.post();
        target.clock.set(LogicalTime::RETIRED);
        engine.event(1, me, format_args!("cancel {}", handle.id));
        engine.resume(me, paused);
    }
}

/// Set `flag` under `slot`'s lifecycle lock and signal its waiter.
fn raise_flag(
    engine: &Engine,
    me: ThreadId,
    slot: &ThreadSlot,
    flag: &AtomicBool,
) -> Result<(), WaitError> {
    slot.lifecycle_lock.lock(engine, me)?;
    flag.store(true, Ordering::SeqCst);
    let signalled = slot.lifecycle_cond.signal(engine, me);
    slot.lifecycle_lock.unlock(engine, me)?;
    signalled
}

/// Block on `slot`'s lifecycle condition until `flag` is set.
fn wait_flag(
    engine: &Engine,
    me: ThreadId,
    slot: &ThreadSlot,
    flag: &AtomicBool,
) -> Result<(), WaitError> {
    slot.lifecycle_lock.lock(engine, me)?;
    while !flag.load(Ordering::SeqCst) {
        slot.lifecycle_cond.wait(engine, me, &slot.lifecycle_lock)?;
    }
    slot.lifecycle_lock.unlock(engine, me)?;
    Ok(())
}

fn worker_main<F, T>(engine: Arc<Engine>, id: ThreadId, f: F) -> Outcome<T>
where
    F: FnOnce() -> T,
    T: Send + 'static,
{
    enter(engine.uid(), id);
    let slot = engine.slot(id);

    if engine.config.pin_threads {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        if let Err(e) = pin_current_thread(id.index() % cpus) {
            warn!(thread = %id, error = %e, "Failed to pin thread");
        }
    }

    match engine.open_counter(id) {
        Ok(counter) => slot.clock.attach(counter),
        Err(e) => {
            warn!(thread = %id, error = %e, "Failed to open event counter");
            *slot.start_error.lock() = Some(e);
            if let Err(e) = raise_flag(&engine, id, slot, &slot.started) {
                warn!(thread = %id, error = ?e, "Failed to report start failure");
            }
            retire(&engine, id, false);
            return Outcome::NotStarted;
        }
    }
    if engine.deterministic() {
        let _ = slot.clock.enable(0);
    }
    engine.event(1, id, format_args!("start"));
    if let Err(e) = raise_flag(&engine, id, slot, &slot.started) {
        warn!(thread = %id, error = ?e, "Failed to report start");
    }

    let outcome = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Outcome::Returned(value),
        Err(payload) => classify::<T>(payload),
    };
    retire(&engine, id, matches!(outcome, Outcome::Cancelled));
    outcome
}

fn classify<T: 'static>(payload: Box<dyn Any + Send>) -> Outcome<T> {
    match payload.downcast::<ExitRequest<T>>() {
        Ok(exit) => Outcome::Returned(exit.0),
        Err(payload) if payload.is::<CancelUnwind>() => Outcome::Cancelled,
        Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Exit sequence: announce `finished`, retire the clock, close the log.
fn retire(engine: &Engine, id: ThreadId, cancelled: bool) {
    let slot = engine.slot(id);
    if !cancelled {
        if engine.deterministic() {
            let _ = slot.clock.enable(0);
        }
        match raise_flag(engine, id, slot, &slot.finished) {
            Ok(()) | Err(WaitError::Cancelled) => {}
            Err(e) => warn!(thread = %id, error = ?e, "Failed to report exit"),
        }
    }

    let _ = slot.clock.disable();
    let clock = slot.clock.read();
    debug!(
        thread = %id,
        clock = clock.get(),
        hw_events = slot.clock.hw_events(),
        sw_events = slot.clock.sw_events(),
        nondet = slot.stats.nondet.load(Ordering::Relaxed),
        locks = slot.stats.locks.load(Ordering::Relaxed),
        barriers = slot.stats.barriers.load(Ordering::Relaxed),
        turn_spins = slot.stats.turn_spins.load(Ordering::Relaxed),
        cancelled,
        "Thread exiting"
    );
    engine.event(1, id, format_args!("exit at {clock}"));
    slot.clock.retire();
    slot.log.close();
    leave();
}

/// Pin the calling thread to `cpu`.
#[cfg(target_os = "linux")]
fn pin_current_thread(cpu: usize) -> std::io::Result<()> {
    let capacity = std::mem::size_of::<libc::cpu_set_t>() * 8;
    if cpu >= capacity {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("cpu {cpu} exceeds cpu set capacity {capacity}"),
        ));
    }
    // SAFETY: a zeroed cpu_set_t is valid and `cpu` is in bounds.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            return Err(std::io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn pin_current_thread(_cpu: usize) -> std::io::Result<()> {
    Ok(())
}
