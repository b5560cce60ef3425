//! # liqshield
//!
//! Automated protection for borrowing positions in a lending protocol. Users
//! subscribe a position with a health-factor threshold and a funding budget;
//! the engine watches the position and, when it becomes risky, tops up
//! collateral or repays debt from the user's pre-authorized funds.
//!
//! ## Architecture
//!
//! The engine spans two domains linked by one-way messages:
//!
//! - **Monitor domain**: the [`dispatch::EventDispatcher`] turns timer ticks,
//!   liquidations and position changes into rate-limited commands
//! - **Execution domain**: the [`protection::ProtectionOrchestrator`] runs
//!   risk analysis and remediation for each command
//!
//! Supporting modules:
//!
//! - **Risk**: health factor, LTV, leverage, premiums and categories
//! - **Lending**: interfaces to the lending protocol and token vault
//! - **Storage**: persisted subscriptions and dispatcher state
//! - **Relay**: tokio services wiring the two domains (feature `runtime`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use liqshield::prelude::*;
//!
//! let orchestrator = ProtectionOrchestrator::new(&config, protocol, vault, metrics);
//! orchestrator.subscribe(user, request, now)?;
//! let summary = orchestrator.check_all(config.trusted_sender, now)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod core;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod lending;
pub mod monitoring;
pub mod protection;
#[cfg(feature = "runtime")]
pub mod relay;
pub mod risk;
pub mod storage;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        config::{DispatchParams, ProtectionParams, ShieldConfig},
        position::{ClassAmounts, PositionSnapshot, ValuationData},
        subscription::{ProtectionType, Subscription, SubscriptionRequest},
    };
    pub use crate::dispatch::{
        CommandEnvelope, CommandSink, DispatchDecision, DomainEvent, EventDispatcher, ShieldCommand,
    };
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventLog, ShieldEvent};
    pub use crate::lending::{LendingProtocol, TokenVault};
    pub use crate::monitoring::MetricsCollector;
    pub use crate::protection::{
        CheckKind, CheckOutcome, ProtectionLedger, ProtectionOrchestrator, RemediationAction,
        RemediationExecutor, RemediationPlanner,
    };
    pub use crate::risk::{RiskAnalysis, RiskCategory, RiskClassifier, RiskMetrics, RiskModel};
    pub use crate::storage::{SharedState, StateManager};
    pub use crate::utils::{
        ids::{Address, AssetId, Hash, MarketId},
        math::FixedPoint,
    };
}

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name
pub const ENGINE_NAME: &str = "liqshield";
