//! Risk analysis.
//!
//! - **Model**: pure conversion of a position snapshot into health factor,
//!   LTV, leverage, utilization, solvency and liquidation premiums
//! - **Classifier**: category selection and the protection decision

pub mod classifier;
pub mod model;

pub use classifier::*;
pub use model::*;
