//! Persistence for subscriptions and dispatcher state.
//!
//! ## Backends
//!
//! - **InMemoryStore**: ephemeral, used by tests and simulations
//! - **FileStore**: JSON snapshot under the configured data directory
//!
//! ## Usage
//!
//! ```rust,ignore
//! use liqshield::storage::{FileStore, StateManager};
//!
//! let state = StateManager::shared(FileStore::open("/var/lib/liqshield")?);
//! let subscriptions = state.load_subscriptions()?;
//! ```

pub mod backend;
pub mod state;

pub use backend::*;
pub use state::*;
