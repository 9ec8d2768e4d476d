//! Burst size generators.

use crate::workload::WorkloadGenerator;

/// Bursts drawn uniformly from `min..=max` events.
#[derive(Debug, Clone, Copy)]
pub struct UniformBursts {
    min: u64,
    max: u64,
}

impl UniformBursts {
    pub fn new(min: u64, max: u64) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
        }
    }
}

impl WorkloadGenerator for UniformBursts {
    fn next_burst(&mut self, rng: &mut impl rand::Rng) -> u64 {
        rng.gen_range(self.min..=self.max)
    }
}

/// Bursts of a constant size.
#[derive(Debug, Clone, Copy)]
pub struct FixedBursts(pub u64);

impl WorkloadGenerator for FixedBursts {
    fn next_burst(&mut self, _rng: &mut impl rand::Rng) -> u64 {
        self.0
    }
}
