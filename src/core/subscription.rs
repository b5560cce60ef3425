//! Protection subscriptions.
//!
//! A subscription authorizes the engine to spend up to `max_protection_amount`
//! of `protection_asset` defending one user's position in one market.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::utils::ids::{Address, AssetId, MarketId};
use crate::utils::math::FixedPoint;
use crate::utils::validation::{validate_health_factors, validate_market_id, validate_max_amount};

/// How a position is defended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionType {
    /// Deposit additional collateral
    CollateralOnly,
    /// Repay outstanding debt
    DebtRepaymentOnly,
}

impl ProtectionType {
    /// True for the repayment path
    pub fn is_repayment(&self) -> bool {
        matches!(self, ProtectionType::DebtRepaymentOnly)
    }
}

impl fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionType::CollateralOnly => write!(f, "collateral"),
            ProtectionType::DebtRepaymentOnly => write!(f, "repayment"),
        }
    }
}

impl std::str::FromStr for ProtectionType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "collateral" | "collateral_only" => Ok(ProtectionType::CollateralOnly),
            "repayment" | "repay" | "debt_repayment_only" => Ok(ProtectionType::DebtRepaymentOnly),
            other => Err(crate::error::Error::InvalidParameter {
                name: "protection_type".into(),
                reason: format!("unknown protection type {:?}", other),
            }),
        }
    }
}

/// Parameters supplied by a user when subscribing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Market to protect
    pub market: MarketId,
    /// Defence strategy
    pub protection_type: ProtectionType,
    /// Protection triggers when the health factor falls below this
    pub health_factor_threshold: FixedPoint,
    /// Health factor remediation aims for
    pub target_health_factor: FixedPoint,
    /// Token spent on remediation
    pub protection_asset: AssetId,
    /// Spending cap per remediation
    pub max_protection_amount: u128,
}

impl SubscriptionRequest {
    /// Checks that need no protocol access
    pub fn validate(&self) -> Result<()> {
        validate_market_id(self.market)?;
        validate_health_factors(self.health_factor_threshold, self.target_health_factor)?;
        validate_max_amount(self.max_protection_amount)?;
        Ok(())
    }
}

/// Stored protection subscription for a (user, market) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscriber
    pub user: Address,
    /// Protected market
    pub market: MarketId,
    /// Whether the subscription is live
    pub active: bool,
    /// Defence strategy
    pub protection_type: ProtectionType,
    /// Trigger threshold
    pub health_factor_threshold: FixedPoint,
    /// Remediation target
    pub target_health_factor: FixedPoint,
    /// Token spent on remediation
    pub protection_asset: AssetId,
    /// Spending cap per remediation
    pub max_protection_amount: u128,
    /// Last remediation attempt, successful or not
    pub last_action_at: Option<u64>,
    /// When the subscription was first created, if known
    pub created_at: Option<u64>,
}

impl Subscription {
    /// Create an active subscription from a request
    pub fn new(user: Address, request: SubscriptionRequest, now: u64) -> Self {
        Self {
            user,
            market: request.market,
            active: true,
            protection_type: request.protection_type,
            health_factor_threshold: request.health_factor_threshold,
            target_health_factor: request.target_health_factor,
            protection_asset: request.protection_asset,
            max_protection_amount: request.max_protection_amount,
            last_action_at: None,
            created_at: Some(now),
        }
    }

    /// Replace the user-controlled parameters, keeping timestamps
    pub fn update(&mut self, request: SubscriptionRequest) {
        self.active = true;
        self.protection_type = request.protection_type;
        self.health_factor_threshold = request.health_factor_threshold;
        self.target_health_factor = request.target_health_factor;
        self.protection_asset = request.protection_asset;
        self.max_protection_amount = request.max_protection_amount;
    }

    /// True while `now` is inside the cooldown window after the last attempt
    pub fn in_cooldown(&self, now: u64, window_secs: u64) -> bool {
        match self.last_action_at {
            Some(last) => now < last.saturating_add(window_secs),
            None => false,
        }
    }

    /// Seconds since creation, or `None` if the creation time is unknown
    pub fn age(&self, now: u64) -> Option<u64> {
        self.created_at.map(|created| now.saturating_sub(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn request() -> SubscriptionRequest {
        SubscriptionRequest {
            market: MarketId::derive("m"),
            protection_type: ProtectionType::CollateralOnly,
            health_factor_threshold: FixedPoint::from_bps(12_000),
            target_health_factor: FixedPoint::from_bps(15_000),
            protection_asset: AssetId::derive("usdc"),
            max_protection_amount: 500,
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let mut r = request();
        r.max_protection_amount = 0;
        assert_eq!(r.validate(), Err(Error::ZeroMaxAmount));

        let mut r = request();
        r.market = MarketId::zero();
        assert!(matches!(r.validate(), Err(Error::InvalidMarket(_))));
    }

    #[test]
    fn test_cooldown_window() {
        let mut sub = Subscription::new(Address::derive("u"), request(), 1_000);
        assert!(!sub.in_cooldown(1_000, 300));

        sub.last_action_at = Some(1_000);
        assert!(sub.in_cooldown(1_299, 300));
        assert!(!sub.in_cooldown(1_300, 300));
    }

    #[test]
    fn test_update_keeps_timestamps() {
        let mut sub = Subscription::new(Address::derive("u"), request(), 1_000);
        sub.last_action_at = Some(1_500);

        let mut r = request();
        r.max_protection_amount = 900;
        r.protection_type = ProtectionType::DebtRepaymentOnly;
        sub.update(r);

        assert_eq!(sub.created_at, Some(1_000));
        assert_eq!(sub.last_action_at, Some(1_500));
        assert_eq!(sub.max_protection_amount, 900);
        assert!(sub.protection_type.is_repayment());
    }

    #[test]
    fn test_age() {
        let mut sub = Subscription::new(Address::derive("u"), request(), 1_000);
        assert_eq!(sub.age(4_000), Some(3_000));

        let genesis = Subscription::new(Address::derive("u"), request(), 0);
        assert_eq!(genesis.age(4_000), Some(4_000));

        sub.created_at = None;
        assert_eq!(sub.age(4_000), None);
    }

    #[test]
    fn test_protection_type_parse() {
        assert_eq!("collateral".parse::<ProtectionType>().unwrap(), ProtectionType::CollateralOnly);
        assert_eq!("repay".parse::<ProtectionType>().unwrap(), ProtectionType::DebtRepaymentOnly);
        assert!("swap".parse::<ProtectionType>().is_err());
    }
}
