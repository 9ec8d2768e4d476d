//! Repeated-run driver.

use crate::config::ScenarioConfig;
use crate::error::ScenarioError;
use crate::report::{ScenarioReport, WallTimeSummary};
use crate::scenario::{run_scenario, ScenarioOutcome, TraceEvent};
use hdrhistogram::Histogram;
use lockstep_runtime::Runtime;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs one scenario many times and compares the runs.
///
/// Every run gets a fresh [`Runtime`], so clocks, ids and statistics start
/// from zero each time.
pub struct ScenarioRunner {
    config: ScenarioConfig,
}

impl ScenarioRunner {
    pub fn new(config: ScenarioConfig) -> Result<Self, ScenarioError> {
        config.validate()?;
        config.runtime_config().validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Execute a single run.
    pub fn run_once(&self) -> Result<(ScenarioOutcome, Runtime), ScenarioError> {
        let rt = Runtime::init(self.config.runtime_config())?;
        let outcome = run_scenario(&rt, &self.config)?;
        Ok((outcome, rt))
    }

    /// Execute all configured runs and summarize them.
    pub fn run(&self) -> Result<ScenarioReport, ScenarioError> {
        let config = &self.config;
        info!(
            scenario = %config.scenario,
            runs = config.runs,
            threads = config.threads,
            mode = ?config.mode,
            "Starting scenario"
        );

        let mut wall = Histogram::<u64>::new(3)?;
        let mut distinct: HashSet<Vec<TraceEvent>> = HashSet::new();
        let mut results: BTreeMap<i64, usize> = BTreeMap::new();
        let mut first_trace: Option<Vec<TraceEvent>> = None;
        let mut matching_first = 0;
        let mut incorrect_runs = 0;
        let mut expected = None;
        let mut last_stats = None;

        for run in 0..config.runs {
            let start = Instant::now();
            let (outcome, rt) = self.run_once()?;
            let micros = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
            wall.saturating_record(micros);

            debug!(
                run,
                result = outcome.result,
                accesses = outcome.trace.len(),
                micros,
                "Run complete"
            );
            if !outcome.is_correct() {
                warn!(run, result = outcome.result, expected = ?outcome.expected, "Unexpected result");
                incorrect_runs += 1;
            }

            *results.entry(outcome.result).or_default() += 1;
            match &first_trace {
                None => {
                    first_trace = Some(outcome.trace.clone());
                    matching_first += 1;
                }
                Some(first) if *first == outcome.trace => matching_first += 1,
                Some(_) => {}
            }
            expected = outcome.expected;
            distinct.insert(outcome.trace);
            last_stats = Some(rt.stats());
        }

        let report = ScenarioReport {
            scenario: config.scenario,
            mode: config.mode,
            runs: config.runs,
            threads: config.threads,
            iterations: config.iterations,
            distinct_traces: distinct.len(),
            matching_first,
            results,
            expected,
            incorrect_runs,
            wall: WallTimeSummary::from_histogram(&wall),
            last_stats,
        };
        info!(
            scenario = %config.scenario,
            distinct_traces = report.distinct_traces,
            deterministic = report.is_deterministic(),
            "Scenario finished"
        );
        Ok(report)
    }
}
