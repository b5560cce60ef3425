//! Risk model: converts a position snapshot into risk metrics.
//!
//! Pure and deterministic. Two valuation paths exist:
//!
//! - **Precise**: each asset class is converted to Y using the price range and
//!   the active-liquidity scaler. Collateral in X is valued at the minimum price
//!   and debt in X at the maximum price. Debt is inflated by 0.5% when the
//!   position's collateral is a large share of the market's liquidity.
//! - **Simple**: raw collateral over raw debt, used when valuation data is
//!   absent or malformed.
//!
//! Leverage and utilization always use raw sums.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::position::{PositionSnapshot, ValuationData};
use crate::core::subscription::Subscription;
use crate::utils::constants::*;
use crate::utils::math::{apply_bps, bps_of, linear_ramp_bps, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// RISK METRICS
// ═══════════════════════════════════════════════════════════════════════════════

/// How collateral and debt equivalents were computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationMode {
    /// Price-range conversion with slippage
    Precise,
    /// Raw sums
    Simple,
    /// Synthesized after a failed position read
    Conservative,
}

/// Numeric output of the risk model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Collateral equivalent over debt equivalent; `INFINITE` without debt
    pub health_factor: FixedPoint,
    /// Raw debt over raw collateral
    pub leverage_ratio: FixedPoint,
    /// Raw debt over raw collateral plus debt
    pub borrow_utilization: FixedPoint,
    /// Position age in seconds
    pub position_age_secs: u64,
    /// Any liquidity shares borrowed
    pub has_liquidity_debt: bool,
    /// Debt equivalent over collateral equivalent, in basis points
    pub ltv_bps: u64,
    /// Replica of the protocol's solvency check failing
    pub would_fail_solvency: bool,
    /// Hard liquidation premium in basis points (0 to 10000)
    pub hard_premium_bps: u64,
    /// Soft liquidation premium in basis points (0 to 10000)
    pub soft_premium_bps: u64,
    /// Debt exists but no collateral does
    pub collateral_empty: bool,
    /// Collateral valued in Y
    pub collateral_equivalent: u128,
    /// Debt valued in Y, slippage included
    pub debt_equivalent: u128,
    /// Valuation path taken
    pub mode: ValuationMode,
}

impl RiskMetrics {
    /// Metrics of a debt-free position
    fn debt_free(position_age_secs: u64, collateral: u128) -> Self {
        Self {
            health_factor: FixedPoint::INFINITE,
            leverage_ratio: FixedPoint::ZERO,
            borrow_utilization: FixedPoint::ZERO,
            position_age_secs,
            has_liquidity_debt: false,
            ltv_bps: 0,
            would_fail_solvency: false,
            hard_premium_bps: 0,
            soft_premium_bps: soft_premium_bps(position_age_secs),
            collateral_empty: false,
            collateral_equivalent: collateral,
            debt_equivalent: 0,
            mode: ValuationMode::Simple,
        }
    }

    /// Worst-case metrics used when the position cannot be read
    pub fn conservative(position_age_secs: u64) -> Self {
        Self {
            health_factor: FixedPoint::ZERO,
            leverage_ratio: FixedPoint::INFINITE,
            borrow_utilization: FixedPoint::ONE,
            position_age_secs,
            has_liquidity_debt: false,
            ltv_bps: MAX_LTV_BPS,
            would_fail_solvency: true,
            hard_premium_bps: MAX_PREMIUM_BPS,
            soft_premium_bps: soft_premium_bps(position_age_secs),
            collateral_empty: true,
            collateral_equivalent: 0,
            debt_equivalent: 0,
            mode: ValuationMode::Conservative,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RISK MODEL
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless risk model
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskModel;

impl RiskModel {
    /// Assess a snapshot for a subscription
    pub fn assess_for(snapshot: &PositionSnapshot, subscription: &Subscription, now: u64) -> RiskMetrics {
        Self::assess(snapshot, subscription.age(now))
    }

    /// Assess a snapshot given the position age (`None` when unknown)
    pub fn assess(snapshot: &PositionSnapshot, age: Option<u64>) -> RiskMetrics {
        let position_age_secs = age.unwrap_or(UNKNOWN_AGE_SENTINEL_SECS);
        let total_collateral = snapshot.total_collateral();
        let total_debt = snapshot.total_debt();

        if total_debt == 0 {
            return RiskMetrics::debt_free(position_age_secs, total_collateral);
        }

        let leverage_ratio = FixedPoint::ratio(total_debt, total_collateral);
        let borrow_utilization =
            FixedPoint::ratio(total_debt, total_collateral.saturating_add(total_debt));

        let (collateral_equivalent, debt_equivalent, mode) = match snapshot.valuation {
            Some(valuation) => match valuation.validate() {
                Ok(()) => {
                    let (c, d) = precise_equivalents(snapshot, &valuation);
                    (c, d, ValuationMode::Precise)
                }
                Err(e) => {
                    debug!("Falling back to simple valuation for {}: {}", snapshot.user.short(), e);
                    (total_collateral, total_debt, ValuationMode::Simple)
                }
            },
            None => (total_collateral, total_debt, ValuationMode::Simple),
        };

        let collateral_empty = total_collateral == 0 || collateral_equivalent == 0;
        let (health_factor, ltv_bps) = if collateral_empty {
            (FixedPoint::ZERO, MAX_LTV_BPS)
        } else {
            (
                FixedPoint::ratio(collateral_equivalent, debt_equivalent),
                bps_of(debt_equivalent, collateral_equivalent).unwrap_or(MAX_LTV_BPS),
            )
        };

        RiskMetrics {
            health_factor,
            leverage_ratio,
            borrow_utilization,
            position_age_secs,
            has_liquidity_debt: snapshot.has_liquidity_debt(),
            ltv_bps,
            would_fail_solvency: ltv_bps >= SOLVENCY_LTV_BPS,
            hard_premium_bps: hard_premium_bps(ltv_bps),
            soft_premium_bps: soft_premium_bps(position_age_secs),
            collateral_empty,
            collateral_equivalent,
            debt_equivalent,
            mode,
        }
    }
}

/// Collateral and debt valued in Y
fn precise_equivalents(snapshot: &PositionSnapshot, valuation: &ValuationData) -> (u128, u128) {
    let scaler = valuation.active_liquidity_scaler;

    let collateral = scaler
        .mul_amount(snapshot.deposits.liquidity)
        .saturating_add(valuation.price_min.mul_amount(snapshot.deposits.x))
        .saturating_add(snapshot.deposits.y);

    let mut debt = scaler
        .mul_amount(snapshot.borrows.liquidity)
        .saturating_add(valuation.price_max.mul_amount(snapshot.borrows.x))
        .saturating_add(snapshot.borrows.y);

    if liquidity_is_scarce(collateral, valuation) {
        debt = apply_bps(debt, BPS_DIVISOR + SCARCITY_SLIPPAGE_BPS);
    }

    (collateral, debt)
}

/// Liquidity is scarce when the position's collateral exceeds a fixed share of it
fn liquidity_is_scarce(collateral: u128, valuation: &ValuationData) -> bool {
    match bps_of(collateral, valuation.liquidity_in_y()) {
        Some(share) => share > SCARCE_LIQUIDITY_SHARE_BPS,
        None => true,
    }
}

/// 0 below 75% LTV, linear to the maximum at 90%
pub fn hard_premium_bps(ltv_bps: u64) -> u64 {
    if ltv_bps <= PROTECTION_LTV_BPS {
        return 0;
    }
    linear_ramp_bps(ltv_bps, HARD_PREMIUM_START_LTV_BPS, HARD_PREMIUM_FULL_LTV_BPS)
}

/// 0 until 7 days, linear to the maximum over the next 30 days
pub fn soft_premium_bps(age_secs: u64) -> u64 {
    linear_ramp_bps(
        age_secs,
        SOFT_PREMIUM_START_SECS,
        SOFT_PREMIUM_START_SECS + SOFT_PREMIUM_RAMP_SECS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::position::ClassAmounts;
    use crate::utils::ids::{Address, MarketId};
    use proptest::prelude::*;

    const DAY: u64 = SECS_PER_DAY;

    fn simple(collateral: u128, debt: u128) -> PositionSnapshot {
        PositionSnapshot::simple(Address::derive("alice"), MarketId::derive("m"), collateral, debt)
    }

    fn deep_pool() -> ValuationData {
        ValuationData {
            price_min: FixedPoint::from_integer(2),
            price_max: FixedPoint::from_integer(3),
            active_liquidity_scaler: FixedPoint::from_integer(10),
            reserve_x: 1_000_000,
            reserve_y: 1_000_000,
        }
    }

    #[test]
    fn test_healthy_position() {
        let m = RiskModel::assess(&simple(1000, 500), Some(DAY));
        assert_eq!(m.health_factor, FixedPoint::from_integer(2));
        assert_eq!(m.ltv_bps, 5000);
        assert_eq!(m.leverage_ratio, FixedPoint::from_bps(5000));
        assert!(!m.would_fail_solvency);
        assert_eq!(m.hard_premium_bps, 0);
        assert_eq!(m.soft_premium_bps, 0);
        assert_eq!(m.mode, ValuationMode::Simple);
    }

    #[test]
    fn test_high_ltv_position() {
        let m = RiskModel::assess(&simple(1000, 900), Some(DAY));
        assert_eq!(m.ltv_bps, 9000);
        assert!(m.would_fail_solvency);
        assert_eq!(m.hard_premium_bps, 10_000);
        assert!(m.health_factor < FixedPoint::from_bps(11_200));
        assert!(m.health_factor > FixedPoint::from_bps(11_100));
    }

    #[test]
    fn test_zero_debt_is_infinite() {
        let m = RiskModel::assess(&simple(1000, 0), None);
        assert!(m.health_factor.is_infinite());
        assert_eq!(m.ltv_bps, 0);
        assert!(!m.would_fail_solvency);

        let empty = RiskModel::assess(&simple(0, 0), None);
        assert!(empty.health_factor.is_infinite());
    }

    #[test]
    fn test_zero_collateral_with_debt() {
        let m = RiskModel::assess(&simple(0, 100), Some(DAY));
        assert!(m.health_factor.is_zero());
        assert_eq!(m.ltv_bps, MAX_LTV_BPS);
        assert!(m.would_fail_solvency);
        assert!(m.collateral_empty);
    }

    #[test]
    fn test_premium_curves() {
        assert_eq!(hard_premium_bps(6000), 0);
        assert_eq!(hard_premium_bps(7000), 0);
        assert_eq!(hard_premium_bps(7500), 0);
        assert_eq!(hard_premium_bps(8250), 5000);
        assert_eq!(hard_premium_bps(9000), 10_000);
        assert_eq!(hard_premium_bps(9900), 10_000);

        assert_eq!(soft_premium_bps(7 * DAY), 0);
        assert_eq!(soft_premium_bps(10 * DAY), 1000);
        assert_eq!(soft_premium_bps(22 * DAY), 5000);
        assert_eq!(soft_premium_bps(100 * DAY), 10_000);
    }

    #[test]
    fn test_unknown_age_uses_sentinel() {
        let m = RiskModel::assess(&simple(1000, 500), None);
        assert_eq!(m.position_age_secs, UNKNOWN_AGE_SENTINEL_SECS);
        assert_eq!(m.soft_premium_bps, 10_000);
    }

    #[test]
    fn test_precise_valuation() {
        let mut pos = simple(0, 0).with_valuation(deep_pool());
        pos.deposits = ClassAmounts::new(10, 100, 1000); // 100 + 200 + 1000 = 1300
        pos.borrows = ClassAmounts::new(0, 100, 0); // 100 X at max price 3 = 300

        let m = RiskModel::assess(&pos, Some(DAY));
        assert_eq!(m.mode, ValuationMode::Precise);
        assert_eq!(m.collateral_equivalent, 1300);
        assert_eq!(m.debt_equivalent, 300);
        assert_eq!(m.ltv_bps, 2307);
        // leverage stays on raw sums: 100 / 1110
        assert_eq!(m.leverage_ratio, FixedPoint::ratio(100, 1110));
    }

    #[test]
    fn test_scarce_liquidity_inflates_debt() {
        let mut shallow = deep_pool();
        shallow.reserve_x = 0;
        shallow.reserve_y = 5_000;

        let pos = simple(1000, 600).with_valuation(shallow);
        let m = RiskModel::assess(&pos, Some(DAY));
        assert_eq!(m.debt_equivalent, 603);

        let deep = simple(1000, 600).with_valuation(deep_pool());
        assert_eq!(RiskModel::assess(&deep, Some(DAY)).debt_equivalent, 600);
    }

    #[test]
    fn test_malformed_valuation_falls_back() {
        let mut bad = deep_pool();
        bad.price_min = FixedPoint::ZERO;
        let m = RiskModel::assess(&simple(1000, 500).with_valuation(bad), Some(DAY));
        assert_eq!(m.mode, ValuationMode::Simple);
        assert_eq!(m.health_factor, FixedPoint::from_integer(2));
    }

    #[test]
    fn test_conservative_metrics() {
        let m = RiskMetrics::conservative(DAY);
        assert!(m.health_factor.is_zero());
        assert!(m.would_fail_solvency);
        assert_eq!(m.mode, ValuationMode::Conservative);
    }

    proptest! {
        #[test]
        fn prop_debt_free_never_risky(collateral in 0u128..u128::MAX / 4, age in 0u64..1_000 * DAY) {
            let m = RiskModel::assess(&simple(collateral, 0), Some(age));
            prop_assert!(m.health_factor.is_infinite());
            prop_assert!(!m.would_fail_solvency);
            prop_assert_eq!(m.ltv_bps, 0);
            prop_assert_eq!(m.hard_premium_bps, 0);
        }

        #[test]
        fn prop_ltv_matches_simple_ratio(collateral in 1u128..1_000_000_000, debt in 1u128..1_000_000_000) {
            let m = RiskModel::assess(&simple(collateral, debt), Some(DAY));
            prop_assert_eq!(m.ltv_bps as u128, (debt * 10_000 / collateral).min(u64::MAX as u128));
            prop_assert_eq!(m.would_fail_solvency, m.ltv_bps >= SOLVENCY_LTV_BPS);
        }
    }
}
