//! Execution-domain protection engine.
//!
//! - **Ledger**: subscriptions keyed by (user, market)
//! - **Planner**: remediation amount and action for a classified position
//! - **Executor**: transfers and protocol calls
//! - **Orchestrator**: per-position state machine, batch and targeted checks

pub mod executor;
pub mod ledger;
pub mod orchestrator;
pub mod planner;

pub use executor::*;
pub use ledger::*;
pub use orchestrator::*;
pub use planner::*;
