//! Workers stepping through phases separated by a barrier.

use super::{join_all, ScenarioOutcome, TraceEvent};
use crate::config::ScenarioConfig;
use crate::error::ScenarioError;
use crate::workload::{UniformBursts, Worker};
use lockstep_runtime::{DetBarrier, DetMutex, Runtime, SyncError};
use std::sync::Arc;

#[derive(Default)]
struct Phases {
    leaders: i64,
    trace: Vec<TraceEvent>,
}

pub(super) fn run(rt: &Runtime, config: &ScenarioConfig) -> Result<ScenarioOutcome, ScenarioError> {
    let barrier = Arc::new(DetBarrier::new(rt, config.threads));
    let phases = Arc::new(DetMutex::new(rt, Phases::default()));

    let mut handles = Vec::with_capacity(config.threads);
    for index in 0..config.threads {
        let barrier = Arc::clone(&barrier);
        let phases = Arc::clone(&phases);
        let mut worker = Worker::new(
            rt.clone(),
            config.seed,
            index,
            UniformBursts::new(1, config.max_burst),
        );
        let iterations = config.iterations;
        handles.push(rt.spawn(move || -> Result<(), SyncError> {
            for phase in 0..iterations {
                worker.burst();
                let leader = barrier.wait().is_leader();
                let mut p = phases.lock()?;
                if leader {
                    p.leaders += 1;
                }
                p.trace.push(TraceEvent::new(worker.runtime(), phase as i64));
            }
            Ok(())
        })?);
    }
    join_all(handles)?;

    let p = phases.lock()?;
    Ok(ScenarioOutcome {
        trace: p.trace.clone(),
        result: p.leaders,
        expected: Some(config.iterations as i64),
    })
}
