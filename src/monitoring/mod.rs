//! Operational counters for the dispatcher and the orchestrator.

pub mod metrics;

pub use metrics::*;
