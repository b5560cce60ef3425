//! Execution-domain events.
//!
//! Every subscription change, remediation outcome and finished check is
//! recorded as a [`ShieldEvent`] in an [`EventLog`] owned by the orchestrator.

pub mod log;

pub use log::*;
