//! Logical time.
//!
//! A thread's logical time is the sum of the events counted by its event
//! counter and a software offset managed by the runtime. Two reserved values
//! sit far above any realistic count:
//!
//! - [`LogicalTime::SUSPENDED`] marks a thread that is blocked on something
//!   outside the ordering protocol (condition wait, external wait, disabled
//!   determinism). It must never be selected as the ordering minimum.
//! - [`LogicalTime::RETIRED`] marks a thread that has exited. It is twice the
//!   suspension sentinel so a retired thread always compares above a
//!   suspended one.
//!
//! Arithmetic saturates so that sentinel values never wrap around.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel used to suspend a thread from ordering.
pub const MAX_LOGICAL_CLOCK: i64 = 20_000_000_000_000;

/// Sentinel used for exited threads.
pub const RETIRED_LOGICAL_CLOCK: i64 = MAX_LOGICAL_CLOCK * 2;

/// A point in logical time.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct LogicalTime(pub i64);

impl LogicalTime {
    /// Start of time.
    pub const ZERO: Self = LogicalTime(0);

    /// Suspension sentinel.
    pub const SUSPENDED: Self = LogicalTime(MAX_LOGICAL_CLOCK);

    /// Retirement sentinel.
    pub const RETIRED: Self = LogicalTime(RETIRED_LOGICAL_CLOCK);

    /// Get the raw value.
    pub fn get(self) -> i64 {
        self.0
    }

    /// Whether this time is a real (non-sentinel) clock value.
    pub fn is_finite(self) -> bool {
        self.0 < MAX_LOGICAL_CLOCK
    }

    /// Whether this time is one of the sentinels.
    pub fn is_sentinel(self) -> bool {
        !self.is_finite()
    }

    /// Advance by `events`, saturating at `i64::MAX`.
    pub fn advance(self, events: i64) -> Self {
        LogicalTime(self.0.saturating_add(events))
    }

    /// The next tick.
    pub fn next(self) -> Self {
        self.advance(1)
    }

    /// Distance from `earlier` to `self`, zero if `earlier` is later.
    pub fn since(self, earlier: LogicalTime) -> i64 {
        self.0.saturating_sub(earlier.0).max(0)
    }

    /// Ordering key used by the turn protocol: clock first, thread id second.
    ///
    /// Returns true if a thread at `self` with id `mine` must wait for a
    /// thread at `other` with id `theirs`.
    pub fn yields_to(self, mine: usize, other: LogicalTime, theirs: usize) -> bool {
        other < self || (other == self && theirs < mine)
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LogicalTime::RETIRED => write!(f, "LT(retired)"),
            t if t.is_sentinel() => write!(f, "LT(suspended)"),
            t => write!(f, "LT({:08})", t.0),
        }
    }
}

impl From<i64> for LogicalTime {
    fn from(value: i64) -> Self {
        LogicalTime(value)
    }
}
