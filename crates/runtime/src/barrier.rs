//! Deterministic barrier, built from the deterministic mutex and condvar.

use crate::condvar::CondCore;
use crate::error::WaitError;
use crate::mutex::MutexCore;
use crate::runtime::{Engine, Runtime};
use lockstep_types::{BarrierId, CondId, MutexId, ThreadId};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Returned by [`DetBarrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
}

impl BarrierWaitResult {
    /// True for exactly one thread per generation: the last to arrive.
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

/// Blocks `count` threads until all have arrived, then releases them.
///
/// Reusable: after a release the next `count` arrivals form a new
/// generation. The last arriver of each generation is the leader; which
/// thread that is depends only on logical time.
#[derive(Debug)]
pub struct DetBarrier {
    rt: Runtime,
    id: BarrierId,
    lock: MutexCore,
    cond: CondCore,
    target: usize,
    count: AtomicUsize,
    generation: AtomicU64,
}

impl DetBarrier {
    /// Create a barrier for `count` threads. A count of zero behaves as one.
    pub fn new(rt: &Runtime, count: usize) -> Self {
        let engine = rt.engine();
        let id = engine.next_barrier_id();
        let capacity = engine.registry.capacity();
        engine.event(1, engine.me(), format_args!("barrier_init({id}, {count})"));
        Self {
            rt: rt.clone(),
            id,
            lock: MutexCore::new(MutexId(u32::MAX - id.0), capacity),
            cond: CondCore::new(CondId(u32::MAX - id.0), capacity),
            target: count.max(1),
            count: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> BarrierId {
        self.id
    }

    /// Number of threads released together.
    pub fn count(&self) -> usize {
        self.target
    }

    /// Block until `count` threads have called `wait`.
    pub fn wait(&self) -> BarrierWaitResult {
        let engine = self.rt.engine();
        let me = engine.me();
        engine.cancel_point(me);
        let result = self.arrive(engine, me);
        match engine.settle(me, result) {
            Ok(r) => r,
            // Only the internal mutex is used and it is never relocked.
            Err(e) => panic!("{}: internal lock failed: {e}", self.id),
        }
    }

    fn arrive(&self, engine: &Engine, me: ThreadId) -> Result<BarrierWaitResult, WaitError> {
        let paused = engine.pause(me);
        let result = self.arrive_paused(engine, me);
        engine.resume(me, paused);
        if result.is_ok() {
            engine.slot(me).stats.record_barrier();
        }
        result
    }

    fn arrive_paused(&self, engine: &Engine, me: ThreadId) -> Result<BarrierWaitResult, WaitError> {
        self.lock.lock(engine, me)?;

        let generation = self.generation.load(Ordering::SeqCst);
        let arrived = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let leader = arrived >= self.target;
        engine.event(
            1,
            me,
            format_args!("barrier({}) {arrived}/{} gen {generation}", self.id, self.target),
        );

        if leader {
            self.count.store(0, Ordering::SeqCst);
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = self.cond.broadcast(engine, me) {
                self.unlock(engine, me);
                return Err(e);
            }
        } else {
            while self.generation.load(Ordering::SeqCst) == generation {
                // A cancelled wait returns without the lock.
                self.cond.wait(engine, me, &self.lock)?;
            }
        }

        self.unlock(engine, me);
        Ok(BarrierWaitResult { leader })
    }

    fn unlock(&self, engine: &Engine, me: ThreadId) {
        if let Err(e) = self.lock.unlock(engine, me) {
            tracing::warn!(barrier = %self.id, error = %e, "Failed to release barrier lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn runtime() -> Runtime {
        Runtime::init(
            RuntimeConfig::testing().with_max_threads(4),
        )
        .unwrap()
    }

    #[test]
    fn test_single_party_barrier_always_leads() {
        let rt = runtime();
        let barrier = DetBarrier::new(&rt, 1);
        for _ in 0..3 {
            assert!(barrier.wait().is_leader());
        }
        assert_eq!(barrier.generation.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_count_behaves_as_one() {
        let rt = runtime();
        let barrier = DetBarrier::new(&rt, 0);
        assert_eq!(barrier.count(), 1);
        assert!(barrier.wait().is_leader());
    }

    #[test]
    fn test_barrier_stats_and_ids() {
        let rt = runtime();
        let a = DetBarrier::new(&rt, 1);
        let b = DetBarrier::new(&rt, 2);
        assert_eq!(a.id(), BarrierId(1));
        assert_eq!(b.id(), BarrierId(2));
        a.wait();
        let passed = rt.engine().slot(ThreadId::MASTER).stats.barriers.load(Ordering::Relaxed);
        assert_eq!(passed, 1);
    }
}
