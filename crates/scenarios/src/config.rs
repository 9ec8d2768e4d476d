//! Configuration types for scenario runs.

use crate::error::ScenarioError;
use lockstep_runtime::{CounterSource, ExecutionMode, RuntimeConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which program to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Deposit and withdrawal racing on one account (atomicity violation).
    #[default]
    Bank,
    /// N threads incrementing a shared counter I times each.
    Counter,
    /// A reader that may run before the writer initializes shared state
    /// (order violation).
    Order,
    /// Producer and consumers around a bounded buffer.
    PingPong,
    /// Workers stepping through phases separated by a barrier.
    Barrier,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 5] = [
        ScenarioKind::Bank,
        ScenarioKind::Counter,
        ScenarioKind::Order,
        ScenarioKind::PingPong,
        ScenarioKind::Barrier,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScenarioKind::Bank => "bank",
            ScenarioKind::Counter => "counter",
            ScenarioKind::Order => "order",
            ScenarioKind::PingPong => "ping-pong",
            ScenarioKind::Barrier => "barrier",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ScenarioKind::Bank => "deposit +1 and withdraw 2 from a balance of 10 with split critical sections",
            ScenarioKind::Counter => "threads x iterations increments of one shared counter",
            ScenarioKind::Order => "a reader racing the writer that initializes shared state",
            ScenarioKind::PingPong => "one producer, two consumers, bounded buffer of two",
            ScenarioKind::Barrier => "workers passing a barrier once per iteration",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase().replace('_', "-");
        ScenarioKind::ALL
            .into_iter()
            .find(|k| k.name() == wanted || (wanted == "pingpong" && *k == ScenarioKind::PingPong))
            .ok_or_else(|| format!("unknown scenario: {s}"))
    }
}

/// Configuration for a scenario run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Program to run.
    pub scenario: ScenarioKind,

    /// Worker threads (not counting the master).
    pub threads: usize,

    /// Iterations per worker.
    pub iterations: usize,

    /// Number of repeated runs.
    pub runs: usize,

    /// Seed for the per-thread work generators.
    pub seed: u64,

    /// Upper bound on the events of one compute burst.
    pub max_burst: u64,

    /// Ordered or plain OS primitives.
    pub mode: ExecutionMode,

    /// Event source for logical clocks.
    pub counter: CounterSource,

    /// Runtime event verbosity.
    pub debug_level: u8,
}

impl ScenarioConfig {
    pub fn new(scenario: ScenarioKind) -> Self {
        Self {
            scenario,
            threads: 4,
            iterations: 50,
            runs: 20,
            seed: 12345,
            max_burst: 64,
            mode: ExecutionMode::Deterministic,
            counter: CounterSource::Software,
            debug_level: 0,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_runs(mut self, runs: usize) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_burst(mut self, max_burst: u64) -> Self {
        self.max_burst = max_burst;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_counter(mut self, counter: CounterSource) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ScenarioError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.runs == 0 {
            return Err(ScenarioError::InvalidConfig("runs must be at least 1".into()));
        }
        if self.threads == 0 {
            return Err(ScenarioError::InvalidConfig("threads must be at least 1".into()));
        }
        if self.max_burst == 0 {
            return Err(ScenarioError::InvalidConfig("max_burst must be at least 1".into()));
        }
        Ok(())
    }

    /// Runtime configuration for one run. Pinning is left off so that runs
    /// of different scenarios can share the machine.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_max_threads(self.threads + 2)
            .with_counter(self.counter)
            .with_mode(self.mode)
            .with_debug_level(self.debug_level)
            .with_pin_threads(false)
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::new(ScenarioKind::default())
    }
}
