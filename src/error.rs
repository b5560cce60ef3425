//! Error types for the liqshield engine.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants are grouped
//! by the layer that raises them so callers can decide how to react:
//!
//! - **Validation**: bad subscribe parameters, rejected synchronously
//! - **Remediation**: balance, authorization, transfer or protocol-call failures,
//!   converted into a `ProtectionFailed` outcome one level up
//! - **Data**: position reads that failed or returned unusable valuation data
//! - **Dispatch**: monitor-domain state machine violations

use thiserror::Error;

/// Result type alias for liqshield operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the liqshield engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Subscription Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Market is unknown to the lending protocol
    #[error("Invalid market: {0}")]
    InvalidMarket(String),

    /// Health factor threshold must be strictly above 1.0
    #[error("Health factor threshold {threshold} must be above 1.0")]
    ThresholdTooLow {
        /// Requested threshold (fixed-point, 1e18 = 1.0)
        threshold: u128,
    },

    /// Target health factor must be strictly above the threshold
    #[error("Target health factor {target} must be above threshold {threshold}")]
    TargetNotAboveThreshold {
        /// Requested target
        target: u128,
        /// Requested threshold
        threshold: u128,
    },

    /// Protection asset is not one of the market's tokens
    #[error("Invalid protection asset {asset} for market {market}")]
    InvalidAsset {
        /// Requested asset
        asset: String,
        /// Market the subscription targets
        market: String,
    },

    /// Spending cap is zero
    #[error("Maximum protection amount cannot be zero")]
    ZeroMaxAmount,

    /// User has nothing borrowed in the market
    #[error("No borrow position for {user} in market {market}")]
    NoBorrowPosition {
        /// Subscribing user
        user: String,
        /// Target market
        market: String,
    },

    /// No active subscription exists for this pair
    #[error("Not subscribed: user {user} in market {market}")]
    NotSubscribed {
        /// User address
        user: String,
        /// Market id
        market: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Remediation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// User balance does not cover the planned amount
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Planned remediation amount
        required: u128,
        /// User balance of the protection asset
        available: u128,
    },

    /// Spending authorization does not cover the planned amount
    #[error("Insufficient authorization: required {required}, granted {granted}")]
    InsufficientAuthorization {
        /// Planned remediation amount
        required: u128,
        /// Allowance granted to the engine
        granted: u128,
    },

    /// Moving funds into protocol custody failed
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// The lending protocol rejected the remediation call
    #[error("Protocol call failed: {0}")]
    ProtocolCallFailed(String),

    // ═══════════════════════════════════════════════════════════════════
    // Data Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Reading the position from the lending protocol failed
    #[error("Position fetch failed: {0}")]
    PositionFetch(String),

    /// Valuation metadata cannot be used for precise pricing
    #[error("Malformed valuation data: {0}")]
    MalformedValuation(String),

    // ═══════════════════════════════════════════════════════════════════
    // Dispatch Errors
    // ═══════════════════════════════════════════════════════════════════

    /// A periodic cycle is already in flight
    #[error("A protection cycle is already in flight")]
    CycleInFlight,

    /// No periodic cycle is in flight
    #[error("No protection cycle is in flight")]
    CycleNotInFlight,

    /// In-flight flag is not yet old enough to be force-cleared
    #[error("Cycle in flight for {elapsed}s, force-clear allowed after {required}s")]
    CycleNotStale {
        /// Seconds the cycle has been in flight
        elapsed: u64,
        /// Seconds required before force-clear
        required: u64,
    },

    /// Market is already in the monitored set
    #[error("Market already monitored: {0}")]
    MarketAlreadyMonitored(String),

    /// Market is not in the monitored set
    #[error("Market not monitored: {0}")]
    MarketNotMonitored(String),

    /// Command could not be handed to the cross-domain channel
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    // ═══════════════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Caller is not allowed to perform this action
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    // ═══════════════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Division by zero in calculation
    #[error("Division by zero in {operation}")]
    DivisionByZero {
        /// Operation that divided by zero
        operation: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    // ═══════════════════════════════════════════════════════════════════
    // Serialization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Lock acquisition failed
    #[error("Failed to acquire lock: {0}")]
    Lock(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Returns true if a later trigger may succeed without operator action
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InsufficientBalance { .. }
                | Error::InsufficientAuthorization { .. }
                | Error::TransferFailed(_)
                | Error::ProtocolCallFailed(_)
                | Error::PositionFetch(_)
                | Error::CycleInFlight
        )
    }

    /// Returns true for failures raised while moving funds or calling the protocol
    pub fn is_remediation_failure(&self) -> bool {
        matches!(
            self,
            Error::InsufficientBalance { .. }
                | Error::InsufficientAuthorization { .. }
                | Error::TransferFailed(_)
                | Error::ProtocolCallFailed(_)
        )
    }

    /// Returns true for rejected subscribe/unsubscribe input
    pub fn is_validation(&self) -> bool {
        (1000..2000).contains(&self.code())
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Subscription validation errors: 1xxx
            Error::InvalidMarket(_) => 1001,
            Error::ThresholdTooLow { .. } => 1002,
            Error::TargetNotAboveThreshold { .. } => 1003,
            Error::InvalidAsset { .. } => 1004,
            Error::ZeroMaxAmount => 1005,
            Error::NoBorrowPosition { .. } => 1006,
            Error::NotSubscribed { .. } => 1007,

            // Remediation errors: 2xxx
            Error::InsufficientBalance { .. } => 2001,
            Error::InsufficientAuthorization { .. } => 2002,
            Error::TransferFailed(_) => 2003,
            Error::ProtocolCallFailed(_) => 2004,

            // Data errors: 3xxx
            Error::PositionFetch(_) => 3001,
            Error::MalformedValuation(_) => 3002,

            // Dispatch errors: 4xxx
            Error::CycleInFlight => 4001,
            Error::CycleNotInFlight => 4002,
            Error::CycleNotStale { .. } => 4003,
            Error::MarketAlreadyMonitored(_) => 4004,
            Error::MarketNotMonitored(_) => 4005,
            Error::Dispatch(_) => 4006,

            // Authorization errors: 5xxx
            Error::Unauthorized(_) => 5001,

            // Parameter errors: 6xxx
            Error::InvalidParameter { .. } => 6001,
            Error::Overflow { .. } => 6002,
            Error::DivisionByZero { .. } => 6003,
            Error::Config(_) => 6004,

            // Serialization errors: 7xxx
            Error::Serialization(_) => 7001,
            Error::Deserialization(_) => 7002,

            // Internal errors: 9xxx
            Error::Internal(_) => 9001,
            Error::Lock(_) => 9002,
            Error::Storage(_) => 9003,
        }
    }
}
