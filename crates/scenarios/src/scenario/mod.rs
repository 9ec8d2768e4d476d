//! Scenario programs.
//!
//! Each scenario is a small multithreaded program written against the
//! deterministic primitives. It returns the order in which shared state was
//! touched (recorded while holding the protecting lock) and a final result,
//! so that repeated runs can be compared.

mod bank;
mod barrier;
mod counter;
mod order;
mod pingpong;

use crate::config::{ScenarioConfig, ScenarioKind};
use crate::error::ScenarioError;
use lockstep_runtime::{JoinHandle, Runtime, SyncError};
use lockstep_types::ThreadId;
use serde::Serialize;

/// One access to shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TraceEvent {
    pub thread: ThreadId,
    pub value: i64,
}

impl TraceEvent {
    pub fn new(rt: &Runtime, value: i64) -> Self {
        Self {
            thread: rt.current_id(),
            value,
        }
    }
}

/// Result of one run of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub trace: Vec<TraceEvent>,
    pub result: i64,
    /// Result of a correct program, if the scenario has one. Scenarios that
    /// demonstrate a bug leave this unset.
    pub expected: Option<i64>,
}

impl ScenarioOutcome {
    pub fn is_correct(&self) -> bool {
        self.expected.map_or(true, |e| e == self.result)
    }
}

/// Run `config.scenario` once on `rt`.
pub fn run_scenario(rt: &Runtime, config: &ScenarioConfig) -> Result<ScenarioOutcome, ScenarioError> {
    match config.scenario {
        ScenarioKind::Bank => bank::run(rt, config),
        ScenarioKind::Counter => counter::run(rt, config),
        ScenarioKind::Order => order::run(rt, config),
        ScenarioKind::PingPong => pingpong::run(rt, config),
        ScenarioKind::Barrier => barrier::run(rt, config),
    }
}

/// Join all workers, returning the first failure.
fn join_all(handles: Vec<JoinHandle<Result<(), SyncError>>>) -> Result<(), ScenarioError> {
    let mut first = None;
    for handle in handles {
        let result = match handle.join() {
            Ok(inner) => inner.map_err(ScenarioError::from),
            Err(e) => Err(ScenarioError::from(e)),
        };
        if let Err(e) = result {
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_runtime::ExecutionMode;

    fn run(kind: ScenarioKind, mode: ExecutionMode) -> ScenarioOutcome {
        let config = ScenarioConfig::new(kind)
            .with_threads(3)
            .with_iterations(10)
            .with_mode(mode);
        let rt = Runtime::init(config.runtime_config()).unwrap();
        run_scenario(&rt, &config).unwrap()
    }

    #[test]
    fn test_every_scenario_completes() {
        for kind in ScenarioKind::ALL {
            let outcome = run(kind, ExecutionMode::Deterministic);
            assert!(!outcome.trace.is_empty(), "{kind}");
            assert!(outcome.is_correct(), "{kind}: {outcome:?}");
        }
    }

    #[test]
    fn test_every_scenario_is_reproducible() {
        for kind in ScenarioKind::ALL {
            let first = run(kind, ExecutionMode::Deterministic);
            for _ in 0..5 {
                assert_eq!(run(kind, ExecutionMode::Deterministic), first, "{kind}");
            }
        }
    }

    #[test]
    fn test_correct_scenarios_pass_in_passthrough() {
        for kind in [ScenarioKind::Counter, ScenarioKind::PingPong, ScenarioKind::Barrier] {
            assert!(run(kind, ExecutionMode::Passthrough).is_correct(), "{kind}");
        }
    }

    #[test]
    fn test_outcome_without_expectation_is_correct() {
        let outcome = ScenarioOutcome {
            trace: vec![],
            result: 3,
            expected: None,
        };
        assert!(outcome.is_correct());
        assert!(!ScenarioOutcome {
            expected: Some(4),
            ..outcome
        }
        .is_correct());
    }
}
