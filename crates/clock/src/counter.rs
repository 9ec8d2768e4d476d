//! Event counter sources.
//!
//! A logical clock is driven by a per-thread event counter. Two sources are
//! provided:
//!
//! - [`SoftwareCounter`]: advanced explicitly by the owning thread. Fully
//!   deterministic, used by tests and on machines without a PMU.
//! - [`HardwareCounter`](crate::HardwareCounter): Linux `perf_event_open`,
//!   counting retired instructions, branches or stores in user space only.
//!
//! The default source is [`CounterSource::Auto`]: a hardware counter where
//! the PMU is reachable, the software counter elsewhere.
//!
//! Counters are opened disabled. The clock cell turns them on and off around
//! synchronization operations so that runtime bookkeeping never counts.

use crate::error::CounterError;
use crate::perf::HardwareCounter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

/// A per-thread event counter.
pub trait EventCounter: Send + Sync + fmt::Debug {
    /// Current count.
    fn read(&self) -> u64;

    /// Start counting.
    fn enable(&self);

    /// Stop counting. The count is preserved.
    fn disable(&self);

    /// Record `events` explicitly.
    ///
    /// Only meaningful for software counters; hardware counters ignore it.
    fn advance(&self, _events: u64) {}

    /// Which source backs this counter.
    fn kind(&self) -> CounterKind;
}

/// Concrete counter backing a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    /// Explicitly advanced counter.
    Software,
    /// PMU counter.
    Hardware(HardwareEvent),
}

/// Hardware events usable as a clock source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareEvent {
    /// Retired instructions.
    #[default]
    Instructions,
    /// Retired branch instructions.
    Branches,
    /// Retired stores, counted as L1 data cache write accesses.
    Stores,
}

impl HardwareEvent {
    /// Short name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            HardwareEvent::Instructions => "instructions",
            HardwareEvent::Branches => "branches",
            HardwareEvent::Stores => "stores",
        }
    }
}

/// Where clocks get their events from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterSource {
    /// Always the software counter.
    Software,
    /// A hardware counter; opening failures are fatal.
    Hardware(HardwareEvent),
    /// A hardware counter if available, software otherwise.
    Auto(HardwareEvent),
}

impl Default for CounterSource {
    /// Retired instructions, falling back to software.
    fn default() -> Self {
        CounterSource::Auto(HardwareEvent::Instructions)
    }
}

impl CounterSource {
    /// Open a fresh counter for the calling thread.
    ///
    /// Hardware counters count events of the thread that opens them, so this
    /// must be called on the thread whose clock it will drive.
    pub fn open(self) -> Result<Box<dyn EventCounter>, CounterError> {
        match self {
            CounterSource::Software => Ok(Box::new(SoftwareCounter::new())),
            CounterSource::Hardware(event) => Ok(Box::new(HardwareCounter::open(event)?)),
            CounterSource::Auto(event) => match HardwareCounter::open(event) {
                Ok(counter) => Ok(Box::new(counter)),
                Err(e) => {
                    warn!(error = %e, "Hardware counter unavailable, using software counter");
                    Ok(Box::new(SoftwareCounter::new()))
                }
            },
        }
    }
}

impl FromStr for CounterSource {
    type Err = String;

    /// Parse `software`, `hardware[:event]` or `auto[:event]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, event) = match s.split_once(':') {
            Some((kind, event)) => (kind, Some(event)),
            None => (s, None),
        };
        let event = match event {
            None | Some("instructions") => HardwareEvent::Instructions,
            Some("branches") => HardwareEvent::Branches,
            Some("stores") => HardwareEvent::Stores,
            Some(other) => return Err(format!("unknown hardware event: {other}")),
        };
        match kind {
            "software" | "sw" => Ok(CounterSource::Software),
            "hardware" | "hw" => Ok(CounterSource::Hardware(event)),
            "auto" => Ok(CounterSource::Auto(event)),
            other => Err(format!("unknown counter source: {other}")),
        }
    }
}

/// Deterministic counter advanced by its owner.
///
/// Events recorded while disabled are dropped, mirroring a stopped PMU.
#[derive(Debug, Default)]
pub struct SoftwareCounter {
    count: AtomicU64,
    enabled: AtomicBool,
}

impl SoftwareCounter {
    /// Create a disabled counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether events are currently recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl EventCounter for SoftwareCounter {
    fn read(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    fn advance(&self, events: u64) {
        if self.enabled.load(Ordering::SeqCst) {
            self.count.fetch_add(events, Ordering::SeqCst);
        }
    }

    fn kind(&self) -> CounterKind {
        CounterKind::Software
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_counter_drops_events_while_disabled() {
        let counter = SoftwareCounter::new();
        counter.advance(5);
        assert_eq!(counter.read(), 0);

        counter.enable();
        counter.advance(5);
        counter.advance(2);
        assert_eq!(counter.read(), 7);

        counter.disable();
        counter.advance(100);
        assert_eq!(counter.read(), 7);
    }

    #[test]
    fn test_parse_counter_source() {
        assert_eq!("software".parse::<CounterSource>(), Ok(CounterSource::Software));
        assert_eq!(
            "hw:branches".parse::<CounterSource>(),
            Ok(CounterSource::Hardware(HardwareEvent::Branches))
        );
        assert_eq!(
            "auto".parse::<CounterSource>(),
            Ok(CounterSource::Auto(HardwareEvent::Instructions))
        );
        assert_eq!(
            "auto:stores".parse::<CounterSource>(),
            Ok(CounterSource::Auto(HardwareEvent::Stores))
        );
        assert!("auto:cycles".parse::<CounterSource>().is_err());
        assert!("pmu".parse::<CounterSource>().is_err());
    }

    #[test]
    fn test_default_source_prefers_hardware() {
        assert_eq!(
            CounterSource::default(),
            CounterSource::Auto(HardwareEvent::Instructions)
        );
    }

    #[test]
    fn test_event_names() {
        assert_eq!(HardwareEvent::Stores.name(), "stores");
        assert_eq!(HardwareEvent::default(), HardwareEvent::Instructions);
    }

    #[test]
    fn test_software_source_opens_disabled() {
        let counter = CounterSource::Software.open().unwrap();
        assert_eq!(counter.kind(), CounterKind::Software);
        counter.advance(3);
        assert_eq!(counter.read(), 0);
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_auto_source_always_opens() {
        // Falls back to software where perf is unavailable (containers, CI).
        let counter = CounterSource::Auto(HardwareEvent::Instructions)
            .open()
            .unwrap();
        counter.enable();
        counter.disable();
        let _ = counter.read();
    }
}
