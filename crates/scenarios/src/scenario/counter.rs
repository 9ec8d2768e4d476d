//! Shared counter incremented by every worker.

use super::{join_all, ScenarioOutcome, TraceEvent};
use crate::config::ScenarioConfig;
use crate::error::ScenarioError;
use crate::workload::{UniformBursts, Worker};
use lockstep_runtime::{DetMutex, Runtime, SyncError};
use std::sync::Arc;

#[derive(Default)]
struct Counter {
    value: i64,
    trace: Vec<TraceEvent>,
}

pub(super) fn run(rt: &Runtime, config: &ScenarioConfig) -> Result<ScenarioOutcome, ScenarioError> {
    let counter = Arc::new(DetMutex::new(rt, Counter::default()));

    let mut handles = Vec::with_capacity(config.threads);
    for index in 0..config.threads {
        let counter = Arc::clone(&counter);
        let mut worker = Worker::new(
            rt.clone(),
            config.seed,
            index,
            UniformBursts::new(1, config.max_burst),
        );
        let iterations = config.iterations;
        handles.push(rt.spawn(move || -> Result<(), SyncError> {
            for _ in 0..iterations {
                worker.burst();
                let mut c = counter.lock()?;
                c.value += 1;
                let value = c.value;
                c.trace.push(TraceEvent::new(worker.runtime(), value));
            }
            Ok(())
        })?);
    }
    join_all(handles)?;

    let c = counter.lock()?;
    Ok(ScenarioOutcome {
        trace: c.trace.clone(),
        result: c.value,
        expected: Some((config.threads * config.iterations) as i64),
    })
}
