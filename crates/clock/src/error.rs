//! Error types for the clock engine.

use thiserror::Error;

/// Errors opening an event counter.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The platform has no hardware counter support.
    #[error("hardware event counters are not supported on this platform")]
    Unsupported,

    /// `perf_event_open` failed.
    #[error("cannot attach event {event}: {source}")]
    Open {
        /// Event that failed to open.
        event: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Status errors from clock enable/disable.
///
/// These are the "fails (no-op)" outcomes: callers use them to remember
/// whether they paused a clock and must resume it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    /// The clock has no counter stream attached.
    #[error("clock is not initialized")]
    Uninitialized,

    /// Enable called on an enabled clock.
    #[error("clock is already enabled")]
    AlreadyEnabled,

    /// Disable called on a disabled clock.
    #[error("clock is already disabled")]
    AlreadyDisabled,

    /// Determinism is off for the calling thread.
    #[error("determinism is disabled")]
    DeterminismOff,
}
