//! Runtime configuration.
//!
//! Built with `Default` plus `with_*` methods, or deserialized from TOML by
//! front ends. A few settings can be overridden from the environment:
//!
//! | Variable | Setting |
//! |---|---|
//! | `LOCKSTEP_DEBUG` | [`RuntimeConfig::debug_level`] |
//! | `LOCKSTEP_LOG_FILE` | [`RuntimeConfig::log_file`] |
//! | `LOCKSTEP_COUNTER` | [`RuntimeConfig::counter`] |
//! | `LOCKSTEP_MODE` | [`RuntimeConfig::mode`] |

use crate::error::RuntimeError;
use lockstep_clock::CounterSource;
use lockstep_types::DEFAULT_MAX_THREADS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Environment variable for the debug level.
pub const ENV_DEBUG: &str = "LOCKSTEP_DEBUG";
/// Environment variable for the per-thread log file prefix.
pub const ENV_LOG_FILE: &str = "LOCKSTEP_LOG_FILE";
/// Environment variable for the counter source.
pub const ENV_COUNTER: &str = "LOCKSTEP_COUNTER";
/// Environment variable for the execution mode.
pub const ENV_MODE: &str = "LOCKSTEP_MODE";

/// How the primitives behave.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Synchronization follows the logical clock order.
    #[default]
    Deterministic,
    /// Primitives are plain OS primitives.
    Passthrough,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deterministic" | "det" => Ok(ExecutionMode::Deterministic),
            "passthrough" | "pthread" | "os" => Ok(ExecutionMode::Passthrough),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of thread slots, including the master thread.
    pub max_threads: usize,

    /// Event source driving every logical clock.
    pub counter: CounterSource,

    /// Verbosity of runtime events (0 = quiet, 1 = basic, 2 = verbose, 3+ = all).
    pub debug_level: u8,

    /// Prefix for per-thread log files (`<prefix>.p<id>`).
    pub log_file: Option<PathBuf>,

    /// Pin each spawned thread to CPU `id % cpus`.
    pub pin_threads: bool,

    /// Deterministic or passthrough primitives.
    pub mode: ExecutionMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            counter: CounterSource::default(),
            debug_level: 0,
            log_file: None,
            pin_threads: true,
            mode: ExecutionMode::default(),
        }
    }
}

impl RuntimeConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Set the number of thread slots.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set the counter source.
    pub fn with_counter(mut self, counter: CounterSource) -> Self {
        self.counter = counter;
        self
    }

    /// Set the debug level.
    pub fn with_debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    /// Write per-thread logs to `<prefix>.p<id>`.
    pub fn with_log_file(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.log_file = Some(prefix.into());
        self
    }

    /// Enable or disable CPU pinning of spawned threads.
    pub fn with_pin_threads(mut self, pin: bool) -> Self {
        self.pin_threads = pin;
        self
    }

    /// Set the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Apply `LOCKSTEP_*` environment overrides.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(ENV_DEBUG) {
            match value.trim().parse() {
                Ok(level) => self.debug_level = level,
                Err(_) => warn!(var = ENV_DEBUG, value = %value, "Ignoring invalid debug level"),
            }
        }
        if let Ok(value) = std::env::var(ENV_LOG_FILE) {
            if !value.is_empty() {
                self.log_file = Some(PathBuf::from(value));
            }
        }
        if let Ok(value) = std::env::var(ENV_COUNTER) {
            match value.trim().parse() {
                Ok(counter) => self.counter = counter,
                Err(e) => warn!(var = ENV_COUNTER, error = %e, "Ignoring invalid counter source"),
            }
        }
        if let Ok(value) = std::env::var(ENV_MODE) {
            match value.trim().parse() {
                Ok(mode) => self.mode = mode,
                Err(e) => warn!(var = ENV_MODE, error = %e, "Ignoring invalid execution mode"),
            }
        }
        self
    }

    /// Reject configurations the runtime cannot run with.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_threads == 0 {
            return Err(RuntimeError::InvalidConfig(
                "max_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
impl RuntimeConfig {
    /// Software clocks and no pinning, so unit tests behave alike on any host.
    pub(crate) fn testing() -> Self {
        Self::default()
            .with_counter(CounterSource::Software)
            .with_pin_threads(false)
    }
}
