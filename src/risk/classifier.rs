//! Risk classification and the protection decision.
//!
//! Category selection is ordered, first match wins:
//!
//! 1. **Leverage**: leverage >= 5.0 or LTV >= 75%
//! 2. **Soft**: older than 7 days, leverage > 3.0, utilization > 0.8, soft premium > 0
//! 3. **Hard**: solvency failing, LTV >= 60% or hard premium > 0
//! 4. **Safe**
//!
//! A position with debt and no collateral is always Hard with immediate action.
//! The protection decision is an OR over independent factors and does not
//! depend on the order above.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::risk::model::RiskMetrics;
use crate::utils::constants::*;
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// CATEGORIES & TRIGGERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Risk category of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    /// No risk factor present
    Safe,
    /// Close to or past the protocol's hard liquidation line
    Hard,
    /// Aged, saturated position accruing a soft premium
    Soft,
    /// Highly leveraged position
    Leverage,
}

impl RiskCategory {
    /// Lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            RiskCategory::Safe => "safe",
            RiskCategory::Hard => "hard",
            RiskCategory::Soft => "soft",
            RiskCategory::Leverage => "leverage",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// First factor that made protection necessary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionTrigger {
    /// Solvency check would fail
    SolvencyFailing,
    /// LTV at or above 60%
    LtvAboveProtectionLine,
    /// Health factor below the subscription threshold
    HealthFactorBelowThreshold,
    /// Hard liquidation premium accruing
    HardPremium,
    /// Soft category with a premium above 5%
    SoftSaturation,
    /// Leverage category requiring immediate action
    LeverageImmediate,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RISK ANALYSIS
// ═══════════════════════════════════════════════════════════════════════════════

/// Classified risk for one position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    /// Numeric model output
    pub metrics: RiskMetrics,
    /// Selected category
    pub category: RiskCategory,
    /// Action cannot wait for the next routine cycle
    pub immediate_action: bool,
    /// Protection should run
    pub protection_needed: bool,
    /// Why protection is needed, if it is
    pub trigger: Option<ProtectionTrigger>,
}

impl RiskAnalysis {
    /// Current health factor
    pub fn health_factor(&self) -> FixedPoint {
        self.metrics.health_factor
    }

    /// Human-readable reason for the decision
    pub fn reason(&self) -> String {
        let m = &self.metrics;
        match self.trigger {
            Some(ProtectionTrigger::SolvencyFailing) if m.collateral_empty => {
                "position has debt but no collateral".to_string()
            }
            Some(ProtectionTrigger::SolvencyFailing) => format!(
                "solvency check fails: LTV {} bps at or above {} bps",
                m.ltv_bps, SOLVENCY_LTV_BPS
            ),
            Some(ProtectionTrigger::LtvAboveProtectionLine) => format!(
                "LTV {} bps at or above protection line {} bps",
                m.ltv_bps, PROTECTION_LTV_BPS
            ),
            Some(ProtectionTrigger::HealthFactorBelowThreshold) => {
                format!("health factor {} below threshold", m.health_factor)
            }
            Some(ProtectionTrigger::HardPremium) => {
                format!("hard liquidation premium {} bps", m.hard_premium_bps)
            }
            Some(ProtectionTrigger::SoftSaturation) => format!(
                "soft liquidation premium {} bps on a saturated position aged {} days",
                m.soft_premium_bps,
                m.position_age_secs / SECS_PER_DAY
            ),
            Some(ProtectionTrigger::LeverageImmediate) => {
                format!("leverage {} requires immediate action", m.leverage_ratio)
            }
            None => "position healthy".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSIFIER
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless risk classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskClassifier;

impl RiskClassifier {
    /// Classify metrics against a subscription threshold
    pub fn classify(metrics: RiskMetrics, threshold: FixedPoint) -> RiskAnalysis {
        let category = Self::category(&metrics);
        let immediate_action = Self::immediate_action(&metrics);
        let trigger = Self::trigger(&metrics, category, immediate_action, threshold);

        RiskAnalysis {
            metrics,
            category,
            immediate_action,
            protection_needed: trigger.is_some(),
            trigger,
        }
    }

    /// Worst-case analysis substituted when the position cannot be read
    pub fn conservative(position_age_secs: u64) -> RiskAnalysis {
        let metrics = RiskMetrics::conservative(position_age_secs);
        RiskAnalysis {
            metrics,
            category: RiskCategory::Hard,
            immediate_action: true,
            protection_needed: true,
            trigger: Some(ProtectionTrigger::SolvencyFailing),
        }
    }

    /// Ordered category rules
    pub fn category(m: &RiskMetrics) -> RiskCategory {
        if m.collateral_empty {
            return RiskCategory::Hard;
        }

        if m.leverage_ratio.raw() >= LEVERAGE_CATEGORY_RATIO || m.ltv_bps >= SOLVENCY_LTV_BPS {
            return RiskCategory::Leverage;
        }

        if m.position_age_secs > SOFT_PREMIUM_START_SECS
            && m.leverage_ratio.raw() > SOFT_LEVERAGE_RATIO
            && m.borrow_utilization.raw() > SOFT_UTILIZATION_RATIO
            && m.soft_premium_bps > 0
        {
            return RiskCategory::Soft;
        }

        if m.would_fail_solvency || m.ltv_bps >= PROTECTION_LTV_BPS || m.hard_premium_bps > 0 {
            return RiskCategory::Hard;
        }

        RiskCategory::Safe
    }

    /// Action cannot wait
    pub fn immediate_action(m: &RiskMetrics) -> bool {
        m.would_fail_solvency
            || m.ltv_bps >= IMMEDIATE_LTV_BPS
            || m.health_factor.raw() <= IMMEDIATE_HEALTH_FACTOR
    }

    fn trigger(
        m: &RiskMetrics,
        category: RiskCategory,
        immediate_action: bool,
        threshold: FixedPoint,
    ) -> Option<ProtectionTrigger> {
        if m.would_fail_solvency {
            Some(ProtectionTrigger::SolvencyFailing)
        } else if m.ltv_bps >= PROTECTION_LTV_BPS {
            Some(ProtectionTrigger::LtvAboveProtectionLine)
        } else if m.health_factor < threshold {
            Some(ProtectionTrigger::HealthFactorBelowThreshold)
        } else if m.hard_premium_bps > 0 {
            Some(ProtectionTrigger::HardPremium)
        } else if category == RiskCategory::Soft && m.soft_premium_bps > SOFT_PROTECTION_PREMIUM_BPS {
            Some(ProtectionTrigger::SoftSaturation)
        } else if category == RiskCategory::Leverage && immediate_action {
            Some(ProtectionTrigger::LeverageImmediate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::position::{ClassAmounts, PositionSnapshot};
    use crate::risk::model::{RiskModel, ValuationMode};
    use crate::utils::ids::{Address, MarketId};

    const DAY: u64 = SECS_PER_DAY;

    fn threshold() -> FixedPoint {
        FixedPoint::from_bps(12_000)
    }

    fn analyze(collateral: u128, debt: u128) -> RiskAnalysis {
        let pos = PositionSnapshot::simple(Address::derive("u"), MarketId::derive("m"), collateral, debt);
        RiskClassifier::classify(RiskModel::assess(&pos, Some(DAY)), threshold())
    }

    fn metrics() -> RiskMetrics {
        RiskMetrics {
            health_factor: FixedPoint::from_integer(3),
            leverage_ratio: FixedPoint::from_bps(35_000),
            borrow_utilization: FixedPoint::from_bps(8_500),
            position_age_secs: 10 * DAY,
            has_liquidity_debt: false,
            ltv_bps: 3_000,
            would_fail_solvency: false,
            hard_premium_bps: 0,
            soft_premium_bps: 1_000,
            collateral_empty: false,
            collateral_equivalent: 10_000,
            debt_equivalent: 3_000,
            mode: ValuationMode::Precise,
        }
    }

    #[test]
    fn test_healthy_position_is_safe() {
        let a = analyze(1000, 500);
        assert_eq!(a.category, RiskCategory::Safe);
        assert!(!a.protection_needed);
        assert!(!a.immediate_action);
        assert_eq!(a.reason(), "position healthy");
    }

    #[test]
    fn test_high_ltv_position() {
        // 90% LTV matches the Leverage rule before Hard
        let a = analyze(1000, 900);
        assert_eq!(a.category, RiskCategory::Leverage);
        assert!(a.metrics.would_fail_solvency);
        assert!(a.metrics.ltv_bps >= PROTECTION_LTV_BPS);
        assert!(a.protection_needed);
        assert!(a.immediate_action);
        assert_eq!(a.trigger, Some(ProtectionTrigger::SolvencyFailing));
    }

    #[test]
    fn test_hard_band() {
        // 65% LTV: above the protection line, below solvency failure
        let a = analyze(1000, 650);
        assert_eq!(a.category, RiskCategory::Hard);
        assert!(a.protection_needed);
        assert!(!a.immediate_action);
        assert_eq!(a.trigger, Some(ProtectionTrigger::LtvAboveProtectionLine));
    }

    #[test]
    fn test_leverage_with_liquidity_debt() {
        let mut pos = PositionSnapshot::simple(Address::derive("u"), MarketId::derive("m"), 100, 0);
        pos.borrows = ClassAmounts::new(200, 0, 400);
        let a = RiskClassifier::classify(RiskModel::assess(&pos, Some(DAY)), threshold());
        assert_eq!(a.metrics.leverage_ratio, FixedPoint::from_integer(6));
        assert_eq!(a.category, RiskCategory::Leverage);
        assert!(a.metrics.has_liquidity_debt);
        assert!(a.protection_needed);
    }

    #[test]
    fn test_soft_saturation_triggers_above_threshold() {
        let a = RiskClassifier::classify(metrics(), threshold());
        assert_eq!(a.category, RiskCategory::Soft);
        assert!(a.metrics.health_factor > threshold());
        assert!(a.protection_needed);
        assert_eq!(a.trigger, Some(ProtectionTrigger::SoftSaturation));
        assert!(a.reason().contains("1000 bps"));
    }

    #[test]
    fn test_soft_requires_every_factor() {
        let mut young = metrics();
        young.position_age_secs = 5 * DAY;
        assert_eq!(RiskClassifier::category(&young), RiskCategory::Safe);

        let mut low_util = metrics();
        low_util.borrow_utilization = FixedPoint::from_bps(8_000);
        assert_eq!(RiskClassifier::category(&low_util), RiskCategory::Safe);

        let mut small_premium = metrics();
        small_premium.soft_premium_bps = 400;
        let a = RiskClassifier::classify(small_premium, threshold());
        assert_eq!(a.category, RiskCategory::Soft);
        assert!(!a.protection_needed);
    }

    #[test]
    fn test_health_factor_below_threshold() {
        let mut m = metrics();
        m.soft_premium_bps = 0;
        m.health_factor = FixedPoint::from_bps(11_500);
        let a = RiskClassifier::classify(m, threshold());
        assert_eq!(a.category, RiskCategory::Safe);
        assert!(a.protection_needed);
        assert_eq!(a.trigger, Some(ProtectionTrigger::HealthFactorBelowThreshold));
    }

    #[test]
    fn test_immediate_action_rules() {
        let mut m = metrics();
        m.health_factor = FixedPoint::from_bps(10_500);
        assert!(RiskClassifier::immediate_action(&m));

        m.health_factor = FixedPoint::from_bps(10_600);
        assert!(!RiskClassifier::immediate_action(&m));

        m.ltv_bps = IMMEDIATE_LTV_BPS;
        assert!(RiskClassifier::immediate_action(&m));
    }

    #[test]
    fn test_zero_collateral_is_hard() {
        let a = analyze(0, 100);
        assert_eq!(a.category, RiskCategory::Hard);
        assert!(a.immediate_action);
        assert!(a.protection_needed);
        assert_eq!(a.reason(), "position has debt but no collateral");
    }

    #[test]
    fn test_debt_free_never_protected() {
        let a = analyze(0, 0);
        assert_eq!(a.category, RiskCategory::Safe);
        assert!(!a.protection_needed);
    }

    #[test]
    fn test_conservative_analysis() {
        let a = RiskClassifier::conservative(DAY);
        assert_eq!(a.category, RiskCategory::Hard);
        assert!(a.immediate_action);
        assert!(a.protection_needed);
        assert!(a.health_factor().is_zero());
    }
}
