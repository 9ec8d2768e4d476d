//! Order violation.
//!
//! A writer initializes shared state after some work; a reader that does
//! less work looks at the state and may find it missing. Free scheduling
//! decides which one wins; under ordering the winner is fixed.

use super::{join_all, ScenarioOutcome, TraceEvent};
use crate::config::ScenarioConfig;
use crate::error::ScenarioError;
use crate::workload::{FixedBursts, UniformBursts, Worker};
use lockstep_runtime::{DetMutex, Runtime, SyncError};
use lockstep_types::ThreadId;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct ThreadState {
    tid: ThreadId,
    state: i64,
}

#[derive(Default)]
struct Shared {
    initialized: Option<ThreadState>,
    /// State seen by the reader, 0 if it ran first.
    observed: i64,
    trace: Vec<TraceEvent>,
}

pub(super) fn run(rt: &Runtime, config: &ScenarioConfig) -> Result<ScenarioOutcome, ScenarioError> {
    let shared = Arc::new(DetMutex::new(rt, Shared::default()));

    let writer = {
        let shared = Arc::clone(&shared);
        let mut worker = Worker::new(rt.clone(), config.seed, 0, UniformBursts::new(1, config.max_burst));
        let bursts = config.iterations;
        rt.spawn(move || -> Result<(), SyncError> {
            for _ in 0..bursts {
                worker.burst();
            }
            let mut s = shared.lock()?;
            let tid = worker.runtime().current_id();
            s.initialized = Some(ThreadState { tid, state: 1 });
            s.trace.push(TraceEvent::new(worker.runtime(), 1));
            Ok(())
        })?
    };

    let reader = {
        let shared = Arc::clone(&shared);
        let mut worker = Worker::new(rt.clone(), config.seed, 1, FixedBursts(1));
        rt.spawn(move || -> Result<(), SyncError> {
            worker.burst();
            let mut s = shared.lock()?;
            s.observed = s.initialized.map_or(0, |t| t.state);
            if let Some(t) = s.initialized {
                tracing::debug!(writer = %t.tid, "reader found initialized state");
            }
            let observed = s.observed;
            s.trace.push(TraceEvent::new(worker.runtime(), observed));
            Ok(())
        })?
    };
    join_all(vec![writer, reader])?;

    let s = shared.lock()?;
    Ok(ScenarioOutcome {
        trace: s.trace.clone(),
        result: s.observed,
        expected: None,
    })
}
