//! Core modules for the liqshield engine.
//!
//! This module contains the fundamental building blocks:
//! - Configuration and cooldown parameters
//! - Position snapshots read from the lending protocol
//! - Protection subscriptions

pub mod config;
pub mod position;
pub mod subscription;

pub use config::*;
pub use position::*;
pub use subscription::*;
