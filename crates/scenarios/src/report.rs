//! Summary of a repeated-run experiment.

use crate::config::ScenarioKind;
use hdrhistogram::Histogram;
use lockstep_runtime::{ExecutionMode, RuntimeStats};
use serde::Serialize;
use std::collections::BTreeMap;

/// Wall-clock time per run, in microseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WallTimeSummary {
    pub count: u64,
    pub min_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
}

impl WallTimeSummary {
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::default();
        }
        Self {
            count: hist.len(),
            min_us: hist.min(),
            p50_us: hist.value_at_quantile(0.50),
            p99_us: hist.value_at_quantile(0.99),
            max_us: hist.max(),
            mean_us: hist.mean(),
        }
    }
}

/// Results of running one scenario `runs` times.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: ScenarioKind,
    pub mode: ExecutionMode,
    pub runs: usize,
    pub threads: usize,
    pub iterations: usize,
    /// Number of different access orders observed.
    pub distinct_traces: usize,
    /// Runs whose access order equals the first run's.
    pub matching_first: usize,
    /// Final result -> number of runs that produced it.
    pub results: BTreeMap<i64, usize>,
    pub expected: Option<i64>,
    pub incorrect_runs: usize,
    pub wall: WallTimeSummary,
    /// Statistics of the last run's runtime.
    pub last_stats: Option<RuntimeStats>,
}

impl ScenarioReport {
    /// Every run produced the same access order and the same result.
    pub fn is_deterministic(&self) -> bool {
        self.distinct_traces <= 1 && self.results.len() <= 1
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Print a human readable summary to stdout.
    pub fn print(&self) {
        println!("\n=== Scenario Report: {} ===", self.scenario);
        println!("Mode:            {:?}", self.mode);
        println!("Threads:         {}", self.threads);
        println!("Iterations:      {}", self.iterations);
        println!("Runs:            {}", self.runs);
        println!();
        println!("Distinct traces: {}", self.distinct_traces);
        println!("Same as run 0:   {}/{}", self.matching_first, self.runs);
        println!(
            "Deterministic:   {}",
            if self.is_deterministic() { "yes" } else { "no" }
        );
        println!();
        println!("Results:");
        for (result, count) in &self.results {
            let marker = match self.expected {
                Some(e) if e == *result => " (expected)",
                Some(_) => " (WRONG)",
                None => "",
            };
            println!("  {result:>8}: {count} runs{marker}");
        }
        println!();
        println!("Wall time per run:");
        println!("  min:  {} us", self.wall.min_us);
        println!("  p50:  {} us", self.wall.p50_us);
        println!("  p99:  {} us", self.wall.p99_us);
        println!("  max:  {} us", self.wall.max_us);
        println!("  mean: {:.1} us", self.wall.mean_us);

        if let Some(stats) = &self.last_stats {
            println!();
            println!("Last run:");
            println!("  threads created: {}", stats.created_threads);
            println!("  lock acquisitions: {}", stats.total_locks());
            println!("  last sync: {}", stats.last_sync);
            for t in &stats.threads {
                println!(
                    "  {}: hw {} sw {} nondet {} locks {} turn waits {}",
                    t.thread, t.hw_events, t.sw_events, t.nondet_events, t.locks, t.turn_waits
                );
            }
        }
    }
}
