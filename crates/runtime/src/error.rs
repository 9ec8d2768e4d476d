//! Error types for the runtime.

use lockstep_clock::CounterError;
use lockstep_types::ThreadId;
use thiserror::Error;

/// Errors from runtime setup and thread creation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Every thread slot has been handed out.
    #[error("thread table is full ({capacity} slots)")]
    ThreadTableFull {
        /// Number of slots in the registry.
        capacity: usize,
    },

    /// The thread's event counter could not be opened.
    #[error("event counter error: {0}")]
    Counter(#[from] CounterError),

    /// The OS refused to create a thread.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A per-thread log file could not be created.
    #[error("failed to open log file: {0}")]
    LogFile(#[source] std::io::Error),

    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Call-order errors from the synchronization primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Unlock (or condition wait) by a thread that does not own the mutex.
    #[error("mutex is not owned by the calling thread")]
    NotOwner,

    /// Lock of a mutex the caller already owns.
    #[error("mutex is already owned by the calling thread")]
    Deadlock,

    /// Try-lock found the mutex held, physically or logically.
    #[error("mutex is busy")]
    Busy,
}

impl SyncError {
    /// Negative errno-style status code.
    pub fn code(self) -> i32 {
        match self {
            SyncError::NotOwner => -1, // EPERM
            SyncError::Busy => -16,    // EBUSY
            SyncError::Deadlock => -35, // EDEADLK
        }
    }
}

/// Errors returned by [`JoinHandle::join`](crate::JoinHandle::join).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The thread panicked.
    #[error("{thread} panicked: {message}")]
    Panicked {
        /// The thread that panicked.
        thread: ThreadId,
        /// Panic message, if it was a string.
        message: String,
    },

    /// The thread was cancelled before producing a value.
    #[error("{thread} was cancelled")]
    Cancelled {
        /// The cancelled thread.
        thread: ThreadId,
    },

    /// The thread never ran its closure.
    #[error("{thread} failed to start")]
    NotStarted {
        /// The thread that failed to start.
        thread: ThreadId,
    },
}

/// Outcome of an internal wait that can be interrupted by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitError {
    Sync(SyncError),
    Cancelled,
}

impl From<SyncError> for WaitError {
    fn from(e: SyncError) -> Self {
        WaitError::Sync(e)
    }
}
