//! Work done by scenario threads between synchronization points.
//!
//! Each worker draws burst sizes from its own seeded generator, performs that
//! much real computation, and reports the same number of events to the
//! runtime. With the software counter the logical clocks then depend only on
//! the seed, not on how fast the machine is.

mod burst;

pub use burst::{FixedBursts, UniformBursts};

use lockstep_runtime::Runtime;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;

/// Trait for generating compute bursts.
pub trait WorkloadGenerator {
    /// Size of the next burst, in events.
    fn next_burst(&mut self, rng: &mut impl rand::Rng) -> u64;
}

/// Seeded per-thread work source.
pub struct Worker<G> {
    rt: Runtime,
    rng: ChaCha8Rng,
    generator: G,
    events: u64,
}

impl<G: WorkloadGenerator> Worker<G> {
    /// Create the worker for thread `index` of a run seeded with `seed`.
    pub fn new(rt: Runtime, seed: u64, index: usize, generator: G) -> Self {
        Self {
            rt,
            rng: ChaCha8Rng::seed_from_u64(thread_seed(seed, index)),
            generator,
            events: 0,
        }
    }

    /// Do one burst of work. Returns its size.
    pub fn burst(&mut self) -> u64 {
        let events = self.generator.next_burst(&mut self.rng);
        black_box(compute(events));
        self.rt.tick(events);
        self.events += events;
        events
    }

    /// Total events reported so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn runtime(&self) -> &Runtime {
        &self.rt
    }
}

/// Independent seed for each thread of a run.
pub fn thread_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add(index as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Busy computation proportional to `events`.
fn compute(events: u64) -> u64 {
    (0..events).fold(1u64, |acc, i| acc.wrapping_mul(31).wrapping_add(black_box(i)))
}
