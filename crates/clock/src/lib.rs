//! Logical clock engine for Lockstep.
//!
//! # Architecture
//!
//! ```text
//! CounterSource ──open()──> Box<dyn EventCounter> ──attach()──> ClockCell
//!                             ├─ SoftwareCounter                 hw_clock + sw_clock
//!                             └─ HardwareCounter (perf)          enable / disable / set
//! ```
//!
//! The runtime owns one [`ClockCell`] per thread slot. The clock algebra in
//! the cell is independent of the counter source, so tests can drive clocks
//! with the deterministic [`SoftwareCounter`] and production runs can use the
//! PMU.

mod cell;
mod counter;
mod error;
mod perf;

pub use cell::{ClockCell, CounterStream};
pub use counter::{CounterKind, CounterSource, EventCounter, HardwareEvent, SoftwareCounter};
pub use error::{ClockError, CounterError};
pub use perf::HardwareCounter;
