use crate::SimulationObserver;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Totals reported at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccessSummary {
    pub reads: u64,
    pub writes: u64,
    /// Guest accesses per second of host time.
    pub rate: f64,
}

/// Counts guest accesses routed through a [`crate::Machine`].
#[derive(Debug)]
pub struct AccessMetrics {
    reads: AtomicU64,
    writes: AtomicU64,
    since: Instant,
}

impl Default for AccessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessMetrics {
    pub fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            since: Instant::now(),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> AccessSummary {
        let (reads, writes) = (self.reads(), self.writes());
        let secs = self.since.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            (reads + writes) as f64 / secs
        } else {
            0.0
        };
        AccessSummary {
            reads,
            writes,
            rate,
        }
    }
}

impl SimulationObserver for AccessMetrics {
    fn on_read(&self, _addr: u64, _value: u32) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn on_write(&self, _addr: u64, _value: u32) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}
