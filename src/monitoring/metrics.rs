//! Engine counters.
//!
//! Counters are lock-free so the dispatcher, the orchestrator and the relay
//! workers can share one collector through an `Arc`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// ═══════════════════════════════════════════════════════════════════════════════
// PRIMITIVES
// ═══════════════════════════════════════════════════════════════════════════════

/// Monotonic atomic counter
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
}

impl Counter {
    /// Create a counter at zero
    pub const fn new(name: &'static str) -> Self {
        Self { value: AtomicU64::new(0), name }
    }

    /// Add one
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reset to zero, returning the previous value
    pub fn reset(&self) -> u64 {
        self.value.swap(0, Ordering::Relaxed)
    }

    /// Metric name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Value that can go up or down
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
    name: &'static str,
}

impl Gauge {
    /// Create a gauge at zero
    pub const fn new(name: &'static str) -> Self {
        Self { value: AtomicU64::new(0), name }
    }

    /// Set the value
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Current value
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Metric name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLECTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// All engine counters
#[derive(Debug)]
pub struct MetricsCollector {
    /// Periodic cycles dispatched
    pub cycles_dispatched: Counter,
    /// Emergency checks dispatched
    pub emergency_dispatches: Counter,
    /// Position-change checks dispatched
    pub position_change_dispatches: Counter,
    /// Domain events dropped by the dispatcher
    pub events_ignored: Counter,
    /// Subscription checks run by the orchestrator
    pub checks_run: Counter,
    /// Successful remediations
    pub protections_executed: Counter,
    /// Failed remediation attempts
    pub protections_failed: Counter,
    /// Checks that ended without a remediation attempt
    pub protections_skipped: Counter,
    /// Position reads replaced by the conservative analysis
    pub fetch_fallbacks: Counter,
    /// Markets currently monitored
    pub monitored_markets: Gauge,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a collector with every counter at zero
    pub const fn new() -> Self {
        Self {
            cycles_dispatched: Counter::new("cycles_dispatched"),
            emergency_dispatches: Counter::new("emergency_dispatches"),
            position_change_dispatches: Counter::new("position_change_dispatches"),
            events_ignored: Counter::new("events_ignored"),
            checks_run: Counter::new("checks_run"),
            protections_executed: Counter::new("protections_executed"),
            protections_failed: Counter::new("protections_failed"),
            protections_skipped: Counter::new("protections_skipped"),
            fetch_fallbacks: Counter::new("fetch_fallbacks"),
            monitored_markets: Gauge::new("monitored_markets"),
        }
    }

    /// Point-in-time copy of every value
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_dispatched: self.cycles_dispatched.value(),
            emergency_dispatches: self.emergency_dispatches.value(),
            position_change_dispatches: self.position_change_dispatches.value(),
            events_ignored: self.events_ignored.value(),
            checks_run: self.checks_run.value(),
            protections_executed: self.protections_executed.value(),
            protections_failed: self.protections_failed.value(),
            protections_skipped: self.protections_skipped.value(),
            fetch_fallbacks: self.fetch_fallbacks.value(),
            monitored_markets: self.monitored_markets.value(),
        }
    }

    /// Named counter values, for text output
    pub fn counters(&self) -> Vec<(&'static str, u64)> {
        [
            &self.cycles_dispatched,
            &self.emergency_dispatches,
            &self.position_change_dispatches,
            &self.events_ignored,
            &self.checks_run,
            &self.protections_executed,
            &self.protections_failed,
            &self.protections_skipped,
            &self.fetch_fallbacks,
        ]
        .iter()
        .map(|c| (c.name(), c.value()))
        .collect()
    }
}

/// Serializable copy of the collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Periodic cycles dispatched
    pub cycles_dispatched: u64,
    /// Emergency checks dispatched
    pub emergency_dispatches: u64,
    /// Position-change checks dispatched
    pub position_change_dispatches: u64,
    /// Domain events dropped
    pub events_ignored: u64,
    /// Subscription checks run
    pub checks_run: u64,
    /// Successful remediations
    pub protections_executed: u64,
    /// Failed remediation attempts
    pub protections_failed: u64,
    /// Checks without an attempt
    pub protections_skipped: u64,
    /// Conservative fallbacks
    pub fetch_fallbacks: u64,
    /// Markets monitored
    pub monitored_markets: u64,
}

impl MetricsSnapshot {
    /// Checks that reached a remediation attempt
    pub fn attempts(&self) -> u64 {
        self.protections_executed + self.protections_failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter");
        counter.increment();
        counter.increment();
        counter.add(5);
        assert_eq!(counter.value(), 7);
        assert_eq!(counter.reset(), 7);
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_snapshot() {
        let metrics = MetricsCollector::new();
        metrics.checks_run.add(3);
        metrics.protections_executed.increment();
        metrics.protections_failed.increment();
        metrics.monitored_markets.set(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.checks_run, 3);
        assert_eq!(snap.attempts(), 2);
        assert_eq!(snap.monitored_markets, 2);
        assert!(metrics.counters().contains(&("checks_run", 3)));
    }
}
