//! Process-wide counters for the memory fabric.
//!
//! Increment at the call site; [`Metrics::flush`] emits all values as one
//! `info!` event (e.g. when a CLI command finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters. No allocation, no locking.
pub struct Metrics {
    memories_written: AtomicU64,
    searches_executed: AtomicU64,
    packs_assembled: AtomicU64,
    events_projected: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            memories_written: AtomicU64::new(0),
            searches_executed: AtomicU64::new(0),
            packs_assembled: AtomicU64::new(0),
            events_projected: AtomicU64::new(0),
        }
    }

    pub fn inc_memories_written(&self) {
        self.memories_written.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "memories_written", "counter incremented");
    }

    pub fn inc_searches(&self) {
        self.searches_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "searches_executed", "counter incremented");
    }

    pub fn inc_packs(&self) {
        self.packs_assembled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "packs_assembled", "counter incremented");
    }

    pub fn add_events_projected(&self, n: u64) {
        self.events_projected.fetch_add(n, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            memories_written = self.memories_written(),
            searches_executed = self.searches_executed(),
            packs_assembled = self.packs_assembled(),
            events_projected = self.events_projected(),
        );
    }

    pub fn memories_written(&self) -> u64 {
        self.memories_written.load(Ordering::Relaxed)
    }

    pub fn searches_executed(&self) -> u64 {
        self.searches_executed.load(Ordering::Relaxed)
    }

    pub fn packs_assembled(&self) -> u64 {
        self.packs_assembled.load(Ordering::Relaxed)
    }

    pub fn events_projected(&self) -> u64 {
        self.events_projected.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (tests).
    pub fn reset(&self) {
        self.memories_written.store(0, Ordering::Relaxed);
        self.searches_executed.store(0, Ordering::Relaxed);
        self.packs_assembled.store(0, Ordering::Relaxed);
        self.events_projected.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_memories_written();
        m.inc_memories_written();
        m.inc_searches();
        m.inc_packs();
        m.add_events_projected(7);
        assert_eq!(m.memories_written(), 2);
        assert_eq!(m.searches_executed(), 1);
        assert_eq!(m.packs_assembled(), 1);
        assert_eq!(m.events_projected(), 7);
        m.flush();
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_memories_written();
        m.inc_searches();
        m.add_events_projected(3);
        m.reset();
        assert_eq!(m.memories_written(), 0);
        assert_eq!(m.searches_executed(), 0);
        assert_eq!(m.events_projected(), 0);
    }
}
