//! Engine constants and risk thresholds.
//!
//! All thresholds used by the risk model, classifier, planner and dispatcher are
//! defined here for easy auditing. Ratios are basis points (10000 = 100%) or raw
//! fixed-point values with 18 decimals (1e18 = 1.0).

// ═══════════════════════════════════════════════════════════════════════════════
// UNITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Basis points divisor (10000 = 100%)
pub const BPS_DIVISOR: u64 = 10_000;

/// Fixed-point scale (1e18 = 1.0)
pub const RATIO_SCALE: u128 = 1_000_000_000_000_000_000;

/// Seconds per day
pub const SECS_PER_DAY: u64 = 86_400;

// ═══════════════════════════════════════════════════════════════════════════════
// LTV & SOLVENCY
// ═══════════════════════════════════════════════════════════════════════════════

/// LTV at or above which the protocol's solvency check fails - 75%
pub const SOLVENCY_LTV_BPS: u64 = 7_500;

/// LTV at or above which protection is always needed - 60%
pub const PROTECTION_LTV_BPS: u64 = 6_000;

/// LTV at or above which action is immediate - 90%
pub const IMMEDIATE_LTV_BPS: u64 = 9_000;

/// LTV reported for positions with debt and no collateral
pub const MAX_LTV_BPS: u64 = BPS_DIVISOR;

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION PREMIUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// LTV where the hard premium starts ramping - 75%
pub const HARD_PREMIUM_START_LTV_BPS: u64 = 7_500;

/// LTV where the hard premium reaches its maximum - 90%
pub const HARD_PREMIUM_FULL_LTV_BPS: u64 = 9_000;

/// Maximum liquidation premium (1.0 in basis points)
pub const MAX_PREMIUM_BPS: u64 = BPS_DIVISOR;

/// Position age after which the soft premium starts accruing - 7 days
pub const SOFT_PREMIUM_START_SECS: u64 = 7 * SECS_PER_DAY;

/// Duration of the soft premium ramp - 30 days
pub const SOFT_PREMIUM_RAMP_SECS: u64 = 30 * SECS_PER_DAY;

/// Age assumed when a position's creation time is unknown - 365 days
pub const UNKNOWN_AGE_SENTINEL_SECS: u64 = 365 * SECS_PER_DAY;

// ═══════════════════════════════════════════════════════════════════════════════
// PRECISE VALUATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Debt inflation applied when market liquidity is scarce - 0.5%
pub const SCARCITY_SLIPPAGE_BPS: u64 = 50;

/// Collateral share of market liquidity above which liquidity counts as scarce - 10%
pub const SCARCE_LIQUIDITY_SHARE_BPS: u64 = 1_000;

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSIFICATION (fixed-point raw values)
// ═══════════════════════════════════════════════════════════════════════════════

/// Leverage ratio at or above which a position is Leverage - 5.0
pub const LEVERAGE_CATEGORY_RATIO: u128 = 5 * RATIO_SCALE;

/// Leverage ratio above which a saturated position is Soft - 3.0
pub const SOFT_LEVERAGE_RATIO: u128 = 3 * RATIO_SCALE;

/// Borrow utilization above which a saturated position is Soft - 0.8
pub const SOFT_UTILIZATION_RATIO: u128 = 8 * RATIO_SCALE / 10;

/// Soft premium above which a Soft position needs protection - 5%
pub const SOFT_PROTECTION_PREMIUM_BPS: u64 = 500;

/// Health factor at or below which action is immediate - 1.05
pub const IMMEDIATE_HEALTH_FACTOR: u128 = 105 * RATIO_SCALE / 100;

/// Lowest allowed subscription threshold (exclusive) - 1.0
pub const MIN_HEALTH_FACTOR_THRESHOLD: u128 = RATIO_SCALE;

// ═══════════════════════════════════════════════════════════════════════════════
// REMEDIATION MULTIPLIERS (basis points, 10000 = x1.0)
// ═══════════════════════════════════════════════════════════════════════════════

/// Leverage category, collateral path - x1.5
pub const LEVERAGE_COLLATERAL_MULTIPLIER_BPS: u64 = 15_000;

/// Leverage category, repayment path - x1.8
pub const LEVERAGE_REPAY_MULTIPLIER_BPS: u64 = 18_000;

/// Soft category, collateral path - x1.25
pub const SOFT_COLLATERAL_MULTIPLIER_BPS: u64 = 12_500;

/// Soft category, repayment path - x1.4
pub const SOFT_REPAY_MULTIPLIER_BPS: u64 = 14_000;

/// Immediate action, collateral path - x2.0
pub const IMMEDIATE_COLLATERAL_MULTIPLIER_BPS: u64 = 20_000;

/// Immediate action, repayment path or failing solvency - x2.5
pub const IMMEDIATE_REPAY_MULTIPLIER_BPS: u64 = 25_000;

/// Width of the LTV band the excess term is scaled over (60% to 100%)
pub const LTV_EXCESS_SPAN_BPS: u64 = BPS_DIVISOR - PROTECTION_LTV_BPS;

// ═══════════════════════════════════════════════════════════════════════════════
// HEALTH FACTOR ESTIMATE (display only)
// ═══════════════════════════════════════════════════════════════════════════════

/// Estimated health factor gain when the full cap is spent - 0.5
pub const FULL_CAP_HF_GAIN_BPS: u64 = 5_000;

/// Estimate boost for Leverage remediation - x1.2
pub const LEVERAGE_ESTIMATE_BPS: u64 = 12_000;

/// Estimate boost for Soft remediation - x1.1
pub const SOFT_ESTIMATE_BPS: u64 = 11_000;

/// Estimate damping for positions at or past the solvency line - x0.8
pub const HIGH_LTV_ESTIMATE_BPS: u64 = 8_000;

// ═══════════════════════════════════════════════════════════════════════════════
// COOLDOWNS & DISPATCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Cooldown between routine remediation attempts - 5 minutes
pub const ROUTINE_COOLDOWN_SECS: u64 = 300;

/// Cooldown between emergency remediation attempts - 1 minute
pub const EMERGENCY_COOLDOWN_SECS: u64 = 60;

/// Minimum spacing between periodic cycles - 5 minutes
pub const PERIODIC_INTERVAL_SECS: u64 = 300;

/// Rate limit for liquidation and risk-increasing dispatch - 30 seconds
pub const EMERGENCY_DISPATCH_COOLDOWN_SECS: u64 = 30;

/// Rate limit for risk-decreasing dispatch - 60 seconds
pub const RISK_DECREASING_COOLDOWN_SECS: u64 = 60;

/// Multiple of the periodic interval after which an in-flight cycle is stale
pub const STALE_CYCLE_MULTIPLIER: u64 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_ordering() {
        assert!(PROTECTION_LTV_BPS < SOLVENCY_LTV_BPS);
        assert!(SOLVENCY_LTV_BPS < IMMEDIATE_LTV_BPS);
        assert!(HARD_PREMIUM_START_LTV_BPS < HARD_PREMIUM_FULL_LTV_BPS);
        assert!(SOFT_LEVERAGE_RATIO < LEVERAGE_CATEGORY_RATIO);
    }

    #[test]
    fn test_dispatch_priority_windows() {
        assert!(EMERGENCY_DISPATCH_COOLDOWN_SECS < RISK_DECREASING_COOLDOWN_SECS);
        assert!(EMERGENCY_COOLDOWN_SECS < ROUTINE_COOLDOWN_SECS);
    }
}
