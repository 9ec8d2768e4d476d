//! Lockstep scenarios
//!
//! Small multithreaded programs with well-known concurrency bugs and
//! patterns, and a driver that runs them repeatedly to show whether the
//! interleaving is reproducible.
//!
//! # Architecture
//!
//! - **Scenarios**: bank account, shared counter, order violation,
//!   producer/consumer, barrier phases
//! - **Workload**: seeded per-thread compute bursts reported to the runtime
//! - **Runner**: fresh runtime per run, trace comparison, wall-time histogram
//! - **Configuration**: builder or TOML file
//!
//! # Example
//!
//! ```no_run
//! use lockstep_scenarios::{ScenarioConfig, ScenarioKind, ScenarioRunner};
//!
//! let config = ScenarioConfig::new(ScenarioKind::Bank).with_runs(50);
//! let report = ScenarioRunner::new(config)?.run()?;
//! assert!(report.is_deterministic());
//! report.print();
//! # Ok::<(), lockstep_scenarios::ScenarioError>(())
//! ```

pub mod config;
pub mod error;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod workload;

pub use config::{ScenarioConfig, ScenarioKind};
pub use error::ScenarioError;
pub use report::{ScenarioReport, WallTimeSummary};
pub use runner::ScenarioRunner;
pub use scenario::{run_scenario, ScenarioOutcome, TraceEvent};
pub use workload::{FixedBursts, UniformBursts, Worker, WorkloadGenerator};
