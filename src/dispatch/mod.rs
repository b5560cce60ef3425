//! Monitor-domain dispatch.
//!
//! - **Command**: cross-domain commands, envelopes and the outbound sink
//! - **State**: the persisted dispatcher record
//! - **Dispatcher**: rate-limiting and priority policy over domain events

pub mod command;
pub mod dispatcher;
pub mod state;

pub use command::*;
pub use dispatcher::*;
pub use state::*;
