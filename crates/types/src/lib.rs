//! Core types for Lockstep.
//!
//! Shared by the clock engine and the runtime:
//!
//! - [`ThreadId`], [`MutexId`], [`CondId`], [`BarrierId`] - identifiers
//! - [`LogicalTime`] - logical clock values and their sentinels
//! - [`WaitQueue`] - fixed-capacity FIFO recording arrival order

mod identifiers;
mod queue;
mod time;

pub use identifiers::{BarrierId, CondId, MutexId, ThreadId, DEFAULT_MAX_THREADS};
pub use queue::{QueueFull, WaitQueue};
pub use time::{LogicalTime, MAX_LOGICAL_CLOCK, RETIRED_LOGICAL_CLOCK};
