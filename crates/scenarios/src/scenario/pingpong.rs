//! Producer and consumers around a bounded buffer.

use super::{join_all, ScenarioOutcome, TraceEvent};
use crate::config::ScenarioConfig;
use crate::error::ScenarioError;
use crate::workload::{UniformBursts, Worker};
use lockstep_runtime::{DetCondvar, DetMutex, Runtime, SyncError};
use std::collections::VecDeque;
use std::sync::Arc;

const CAPACITY: usize = 2;

#[derive(Default)]
struct Buffer {
    items: VecDeque<i64>,
    consumed: i64,
    trace: Vec<TraceEvent>,
}

struct Channel {
    buffer: DetMutex<Buffer>,
    not_empty: DetCondvar,
    not_full: DetCondvar,
}

fn produce(channel: &Channel, mut worker: Worker<UniformBursts>, items: i64) -> Result<(), SyncError> {
    for item in 1..=items {
        worker.burst();
        let guard = channel.buffer.lock()?;
        let mut buf = channel
            .not_full
            .wait_while(guard, |b| b.items.len() >= CAPACITY)?;
        buf.items.push_back(item);
        buf.trace.push(TraceEvent::new(worker.runtime(), item));
        channel.not_empty.signal()?;
    }
    Ok(())
}

fn consume(channel: &Channel, mut worker: Worker<UniformBursts>, items: usize) -> Result<(), SyncError> {
    for _ in 0..items {
        let guard = channel.buffer.lock()?;
        let mut buf = channel.not_empty.wait_while(guard, |b| b.items.is_empty())?;
        if let Some(item) = buf.items.pop_front() {
            buf.consumed += item;
            buf.trace.push(TraceEvent::new(worker.runtime(), -item));
        }
        channel.not_full.signal()?;
        drop(buf);
        worker.burst();
    }
    Ok(())
}

pub(super) fn run(rt: &Runtime, config: &ScenarioConfig) -> Result<ScenarioOutcome, ScenarioError> {
    let channel = Arc::new(Channel {
        buffer: DetMutex::new(rt, Buffer::default()),
        not_empty: DetCondvar::new(rt),
        not_full: DetCondvar::new(rt),
    });
    let consumers = config.threads.saturating_sub(1).max(1);
    let items = (consumers * config.iterations) as i64;
    let bursts = UniformBursts::new(1, config.max_burst);

    let mut handles = Vec::with_capacity(consumers + 1);
    {
        let channel = Arc::clone(&channel);
        let worker = Worker::new(rt.clone(), config.seed, 0, bursts);
        handles.push(rt.spawn(move || produce(&channel, worker, items))?);
    }
    for index in 1..=consumers {
        let channel = Arc::clone(&channel);
        let worker = Worker::new(rt.clone(), config.seed, index, bursts);
        let iterations = config.iterations;
        handles.push(rt.spawn(move || consume(&channel, worker, iterations))?);
    }
    join_all(handles)?;

    let buf = channel.buffer.lock()?;
    Ok(ScenarioOutcome {
        trace: buf.trace.clone(),
        result: buf.consumed,
        expected: Some(items * (items + 1) / 2),
    })
}
