//! Deterministic multithreading runtime.
//!
//! Programs built on this crate perform every synchronization operation in
//! an order fixed by logical time, so repeated runs with the same input
//! produce the same sequence of lock acquisitions, signal deliveries and
//! barrier releases regardless of OS scheduling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Runtime (init / spawn / join / exit / cancel / brackets)      │
//! └───────┬───────────────┬───────────────┬──────────────────────┘
//!         │               │               │
//!  ┌──────▼─────┐  ┌──────▼──────┐  ┌─────▼──────┐
//!  │ DetMutex   │  │ DetCondvar  │  │ DetBarrier │
//!  └──────┬─────┘  └──────┬──────┘  └─────┬──────┘
//!         └───────────────┼───────────────┘
//!                  ┌──────▼──────┐
//!                  │ wait_for_turn│  global minimum clock
//!                  └──────┬──────┘
//!                  ┌──────▼──────┐
//!                  │ Registry    │  one ThreadSlot per id, each with a
//!                  └─────────────┘  ClockCell from lockstep-clock
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lockstep_runtime::{DetMutex, Runtime, RuntimeConfig};
//! use std::sync::Arc;
//!
//! let rt = Runtime::init(RuntimeConfig::default()).unwrap();
//! let total = Arc::new(DetMutex::new(&rt, 0u64));
//!
//! let workers: Vec<_> = (0..4)
//!     .map(|_| {
//!         let total = Arc::clone(&total);
//!         let rt2 = rt.clone();
//!         rt.spawn(move || {
//!             for _ in 0..100 {
//!                 rt2.tick(10);
//!                 *total.lock().unwrap() += 1;
//!             }
//!         })
//!         .unwrap()
//!     })
//!     .collect();
//! for w in workers {
//!     w.join().unwrap();
//! }
//! assert_eq!(*total.lock().unwrap(), 400);
//! ```

mod barrier;
mod bracket;
mod condvar;
mod config;
mod error;
mod lifecycle;
mod log;
mod mutex;
mod registry;
mod runtime;
mod stats;
mod turn;

pub use barrier::{BarrierWaitResult, DetBarrier};
pub use condvar::{DetCondvar, RawDetCondvar};
pub use config::{
    ExecutionMode, RuntimeConfig, ENV_COUNTER, ENV_DEBUG, ENV_LOG_FILE, ENV_MODE,
};
pub use error::{JoinError, RuntimeError, SyncError};
pub use lifecycle::JoinHandle;
pub use log::thread_log_path;
pub use mutex::{DetMutex, DetMutexGuard, RawDetMutex};
pub use runtime::Runtime;
pub use stats::{RuntimeStats, ThreadStats};

pub use lockstep_clock::{ClockError, CounterSource, HardwareEvent};
pub use lockstep_types::{BarrierId, CondId, LogicalTime, MutexId, ThreadId};
