//! Test helpers for Lockstep.
//!
//! Fixtures that build a runtime suited to tests (software counter, no CPU
//! pinning, quiet) and utilities for checking that repeated runs of a
//! program produce the same trace.

use lockstep_runtime::{CounterSource, ExecutionMode, Runtime, RuntimeConfig};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

pub use lockstep_types::ThreadId;

/// Thread slots in a test runtime.
pub const TEST_MAX_THREADS: usize = 16;

/// Deterministic test configuration.
pub fn test_config() -> RuntimeConfig {
    RuntimeConfig::default()
        .with_max_threads(TEST_MAX_THREADS)
        .with_counter(CounterSource::Software)
        .with_pin_threads(false)
        .with_debug_level(0)
        .with_mode(ExecutionMode::Deterministic)
}

/// Runtime built from [`test_config`], registered on the calling thread.
pub fn test_runtime() -> Runtime {
    Runtime::init(test_config()).expect("test runtime")
}

/// Runtime in passthrough mode: same API, no ordering.
pub fn passthrough_runtime() -> Runtime {
    Runtime::init(test_config().with_mode(ExecutionMode::Passthrough)).expect("test runtime")
}

/// Shared, append-only event log written from several threads.
///
/// Appends are made while holding a deterministic lock in the code under
/// test, so the resulting order is the order the runtime imposed.
#[derive(Debug)]
pub struct TraceRecorder<E> {
    events: Arc<Mutex<Vec<E>>>,
}

impl<E> Clone for TraceRecorder<E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<E> Default for TraceRecorder<E> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E: Clone> TraceRecorder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: E) {
        self.events.lock().push(event);
    }

    /// Copy of the events recorded so far.
    pub fn snapshot(&self) -> Vec<E> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Run `program` `runs` times, each on a fresh test runtime, and collect
/// what each run returns.
pub fn repeat_runs<R>(runs: usize, mut program: impl FnMut(&Runtime) -> R) -> Vec<R> {
    (0..runs)
        .map(|_| {
            let rt = test_runtime();
            program(&rt)
        })
        .collect()
}

/// Panic unless every run produced the same result as the first.
pub fn assert_all_identical<R: PartialEq + Debug>(results: &[R]) {
    let Some(first) = results.first() else {
        return;
    };
    for (run, result) in results.iter().enumerate().skip(1) {
        assert_eq!(
            result, first,
            "run {run} diverged from run 0"
        );
    }
}
