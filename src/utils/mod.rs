//! Utility modules for the liqshield engine.
//!
//! This module contains shared utilities used across the engine:
//! - Identifiers and hashing
//! - Fixed-point arithmetic
//! - Validation helpers
//! - Constants
//! - Wall-clock helpers

pub mod constants;
pub mod ids;
pub mod math;
pub mod time;
pub mod validation;

pub use constants::*;
pub use ids::*;
pub use math::*;
pub use time::*;
pub use validation::*;
