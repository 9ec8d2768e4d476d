//! Per-thread logical clock.
//!
//! A [`ClockCell`] holds the two halves of a thread's logical time:
//!
//! - `hw_clock`: the event counter value cached at the last disable
//! - `sw_clock`: a software offset adjusted by the runtime
//!
//! While the clock is enabled the live counter replaces the cached value, so
//! the visible time is `counter + sw_clock`. While disabled it is
//! `hw_clock + sw_clock` and does not move unless the runtime changes
//! `sw_clock`.
//!
//! # Concurrency
//!
//! Only the owning thread mutates its cell, except for wake-ups (a condition
//! signaler sets the waiter's clock) and retirement. Every thread may read
//! every cell. All fields are atomics accessed with `SeqCst`; cross-thread
//! reads additionally fence before loading.
//!
//! The counter stream lives in an [`ArcSwapOption`] so that a retiring thread
//! can release it while others still read through a loaded guard.

use crate::counter::{CounterKind, EventCounter};
use crate::error::ClockError;
use arc_swap::ArcSwapOption;
use lockstep_types::LogicalTime;
use std::sync::atomic::{fence, AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// A thread's event counter, shared with readers on other threads.
#[derive(Debug)]
pub struct CounterStream {
    counter: Box<dyn EventCounter>,
}

impl CounterStream {
    /// Wrap an opened counter.
    pub fn new(counter: Box<dyn EventCounter>) -> Self {
        Self { counter }
    }

    /// Current count, saturated into the logical clock range.
    pub fn read(&self) -> i64 {
        i64::try_from(self.counter.read()).unwrap_or(i64::MAX)
    }

    /// Source of this stream.
    pub fn kind(&self) -> CounterKind {
        self.counter.kind()
    }
}

/// Logical clock state for one thread.
#[derive(Debug, Default)]
pub struct ClockCell {
    hw_clock: AtomicI64,
    sw_clock: AtomicI64,
    enabled: AtomicBool,
    stream: ArcSwapOption<CounterStream>,
    last_exit: AtomicI64,
}

impl ClockCell {
    /// Create a detached, disabled clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new owner: `hw_clock = 0`, `sw_clock = start`, disabled.
    pub fn reset(&self, start: LogicalTime) {
        self.enabled.store(false, Ordering::SeqCst);
        self.hw_clock.store(0, Ordering::SeqCst);
        self.sw_clock.store(start.get(), Ordering::SeqCst);
        self.last_exit.store(0, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    /// Attach the owner's counter stream. Replaces any previous stream.
    pub fn attach(&self, counter: Box<dyn EventCounter>) {
        self.stream.store(Some(Arc::new(CounterStream::new(counter))));
    }

    /// Release the counter stream.
    ///
    /// The current count is folded into `hw_clock` first, so the visible
    /// time does not jump.
    pub fn detach(&self) -> Option<Arc<CounterStream>> {
        if self.enabled.load(Ordering::SeqCst) {
            let _ = self.disable();
        }
        self.stream.swap(None)
    }

    /// Whether a counter stream is attached.
    pub fn is_attached(&self) -> bool {
        self.stream.load().is_some()
    }

    /// Kind of the attached counter, if any.
    pub fn counter_kind(&self) -> Option<CounterKind> {
        self.stream.load().as_ref().map(|s| s.kind())
    }

    /// Whether the counter half is live.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Current logical time, read by the owner.
    pub fn read(&self) -> LogicalTime {
        let sw = self.sw_clock.load(Ordering::SeqCst);
        LogicalTime(self.hw_events().saturating_add(sw))
    }

    /// Current logical time, read from another thread.
    pub fn read_remote(&self) -> LogicalTime {
        fence(Ordering::SeqCst);
        self.read()
    }

    /// Counter half of the clock (live if enabled).
    pub fn hw_events(&self) -> i64 {
        if self.enabled.load(Ordering::SeqCst) {
            if let Some(stream) = self.stream.load().as_ref() {
                return stream.read();
            }
        }
        self.hw_clock.load(Ordering::SeqCst)
    }

    /// Software half of the clock.
    pub fn sw_events(&self) -> i64 {
        self.sw_clock.load(Ordering::SeqCst)
    }

    /// Add `increment` to `sw_clock` and start counting.
    ///
    /// Fails without side effects if already enabled or detached.
    pub fn enable(&self, increment: i64) -> Result<(), ClockError> {
        let guard = self.stream.load();
        let stream = guard.as_ref().ok_or(ClockError::Uninitialized)?;
        fence(Ordering::SeqCst);
        if self.enabled.load(Ordering::SeqCst) {
            return Err(ClockError::AlreadyEnabled);
        }
        self.bump(increment);
        fence(Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
        stream.counter.enable();
        Ok(())
    }

    /// Stop counting and cache the count in `hw_clock`.
    ///
    /// Fails without side effects if already disabled or detached.
    pub fn disable(&self) -> Result<(), ClockError> {
        let guard = self.stream.load();
        let stream = guard.as_ref().ok_or(ClockError::Uninitialized)?;
        fence(Ordering::SeqCst);
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(ClockError::AlreadyDisabled);
        }
        stream.counter.disable();
        self.hw_clock.store(stream.read(), Ordering::SeqCst);
        fence(Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        Ok(())
    }

    /// Add `events` to `sw_clock`, saturating.
    pub fn bump(&self, events: i64) {
        let _ = self
            .sw_clock
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |sw| {
                Some(sw.saturating_add(events))
            });
    }

    /// Force the visible time to `time` (as of the cached counter value).
    ///
    /// Used on disabled clocks: wake-ups, sentinels and catch-up.
    pub fn set(&self, time: LogicalTime) {
        fence(Ordering::SeqCst);
        let hw = self.hw_clock.load(Ordering::SeqCst);
        self.sw_clock
            .store(time.get().saturating_sub(hw), Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    /// Feed `events` to a software counter stream.
    pub fn tick(&self, events: u64) {
        if let Some(stream) = self.stream.load().as_ref() {
            stream.counter.advance(events);
        }
    }

    /// Record the current time as the exit point and suspend the clock.
    pub fn exit(&self) -> LogicalTime {
        let now = self.read();
        self.last_exit.store(now.get(), Ordering::SeqCst);
        self.set(LogicalTime::SUSPENDED);
        now
    }

    /// Time recorded by the last [`exit`](Self::exit).
    pub fn last_exit(&self) -> LogicalTime {
        LogicalTime(self.last_exit.load(Ordering::SeqCst))
    }

    /// Stop counting, release the stream and park the clock at the
    /// retirement sentinel.
    pub fn retire(&self) -> Option<Arc<CounterStream>> {
        let stream = self.detach();
        self.set(LogicalTime::RETIRED);
        stream
    }
}
