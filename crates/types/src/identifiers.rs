//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of thread slots in a runtime's registry.
pub const DEFAULT_MAX_THREADS: usize = 128;

/// Thread identifier.
///
/// Ids are handed out from a monotonic counter and are never reused within a
/// runtime. Id 0 is always the master thread that initialized the runtime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ThreadId(pub usize);

impl ThreadId {
    /// The master thread.
    pub const MASTER: Self = ThreadId(0);

    /// Get the raw index.
    pub fn index(self) -> usize {
        self.0
    }

    /// Whether this is the master thread.
    pub fn is_master(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

/// Deterministic mutex identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MutexId(pub u32);

impl fmt::Display for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mutex({})", self.0)
    }
}

/// Deterministic condition variable identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CondId(pub u32);

impl fmt::Display for CondId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cond({})", self.0)
    }
}

/// Deterministic barrier identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BarrierId(pub u32);

impl fmt::Display for BarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Barrier({})", self.0)
    }
}
