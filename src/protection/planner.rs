//! Remediation planning: how much to spend and on which action.
//!
//! The amount is the larger of two terms, scaled by category and urgency and
//! capped by the subscription's spending limit:
//!
//! - **Base**: `cap * (target - hf) / target`, zero once the target is reached
//! - **LTV excess**: `cap * (ltv - 60%) / 40%`
//!
//! Every step saturates, so the amount never decreases as LTV rises with the
//! other inputs held fixed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::subscription::{ProtectionType, Subscription};
use crate::risk::classifier::{RiskAnalysis, RiskCategory};
use crate::utils::constants::*;
use crate::utils::math::{apply_bps, mul_div_saturating, FixedPoint};

// ═══════════════════════════════════════════════════════════════════════════════
// ACTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Why liquidity debt is repaid first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityRepayPurpose {
    /// Reduce leverage on a Leverage position
    Deleveraging,
    /// Reduce saturation on a Soft position
    SaturationReduction,
}

/// Protocol action used for remediation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RemediationAction {
    /// Deposit additional collateral
    DepositCollateral,
    /// Repay token debt
    RepayDebt,
    /// Repay borrowed liquidity shares
    RepayLiquidity {
        /// Reason this variant was chosen
        purpose: LiquidityRepayPurpose,
    },
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationAction::DepositCollateral => write!(f, "deposit collateral"),
            RemediationAction::RepayDebt => write!(f, "repay debt"),
            RemediationAction::RepayLiquidity { purpose: LiquidityRepayPurpose::Deleveraging } => {
                write!(f, "repay liquidity (deleveraging)")
            }
            RemediationAction::RepayLiquidity {
                purpose: LiquidityRepayPurpose::SaturationReduction,
            } => write!(f, "repay liquidity (saturation reduction)"),
        }
    }
}

/// Output of the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationPlan {
    /// Selected action
    pub action: RemediationAction,
    /// Amount to spend after multipliers and cap
    pub amount: u128,
    /// Larger of the base and LTV-excess terms, before multipliers
    pub unscaled_amount: u128,
    /// Combined category and urgency multiplier
    pub multiplier_bps: u64,
}

impl RemediationPlan {
    /// Nothing to spend
    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLANNER
// ═══════════════════════════════════════════════════════════════════════════════

/// Stateless remediation planner
#[derive(Debug, Clone, Copy, Default)]
pub struct RemediationPlanner;

impl RemediationPlanner {
    /// Plan remediation for a classified position
    pub fn plan(analysis: &RiskAnalysis, subscription: &Subscription) -> RemediationPlan {
        let action = Self::select_action(analysis, subscription.protection_type);
        let cap = subscription.max_protection_amount;
        let m = &analysis.metrics;

        if m.health_factor >= subscription.target_health_factor && !m.would_fail_solvency {
            return RemediationPlan {
                action,
                amount: 0,
                unscaled_amount: 0,
                multiplier_bps: BPS_DIVISOR,
            };
        }

        let unscaled_amount = Self::base_amount(m.health_factor, subscription.target_health_factor, cap)
            .max(Self::ltv_excess_amount(m.ltv_bps, cap));

        let repayment = subscription.protection_type.is_repayment();
        let category_bps = Self::category_multiplier_bps(analysis.category, repayment);
        let urgency_bps = Self::urgency_multiplier_bps(analysis, repayment);

        let amount = apply_bps(apply_bps(unscaled_amount, category_bps), urgency_bps).min(cap);

        RemediationPlan {
            action,
            amount,
            unscaled_amount,
            multiplier_bps: (category_bps as u128 * urgency_bps as u128 / BPS_DIVISOR as u128) as u64,
        }
    }

    /// Action for a protection type and category
    pub fn select_action(analysis: &RiskAnalysis, protection_type: ProtectionType) -> RemediationAction {
        match protection_type {
            ProtectionType::CollateralOnly => RemediationAction::DepositCollateral,
            ProtectionType::DebtRepaymentOnly => {
                let liquidity_debt = analysis.metrics.has_liquidity_debt;
                match analysis.category {
                    RiskCategory::Leverage if liquidity_debt => RemediationAction::RepayLiquidity {
                        purpose: LiquidityRepayPurpose::Deleveraging,
                    },
                    RiskCategory::Soft if liquidity_debt => RemediationAction::RepayLiquidity {
                        purpose: LiquidityRepayPurpose::SaturationReduction,
                    },
                    _ => RemediationAction::RepayDebt,
                }
            }
        }
    }

    /// `cap * (target - hf) / target`, zero at or above target
    pub fn base_amount(health_factor: FixedPoint, target: FixedPoint, cap: u128) -> u128 {
        if health_factor >= target || target.is_zero() {
            return 0;
        }
        let shortfall = target.saturating_sub(health_factor);
        mul_div_saturating(cap, shortfall.raw(), target.raw())
    }

    /// `cap * (ltv - 60%) / 40%`, zero at or below the protection line
    pub fn ltv_excess_amount(ltv_bps: u64, cap: u128) -> u128 {
        if ltv_bps <= PROTECTION_LTV_BPS {
            return 0;
        }
        let excess = (ltv_bps - PROTECTION_LTV_BPS) as u128;
        mul_div_saturating(cap, excess, LTV_EXCESS_SPAN_BPS as u128)
    }

    fn category_multiplier_bps(category: RiskCategory, repayment: bool) -> u64 {
        match (category, repayment) {
            (RiskCategory::Leverage, false) => LEVERAGE_COLLATERAL_MULTIPLIER_BPS,
            (RiskCategory::Leverage, true) => LEVERAGE_REPAY_MULTIPLIER_BPS,
            (RiskCategory::Soft, false) => SOFT_COLLATERAL_MULTIPLIER_BPS,
            (RiskCategory::Soft, true) => SOFT_REPAY_MULTIPLIER_BPS,
            _ => BPS_DIVISOR,
        }
    }

    fn urgency_multiplier_bps(analysis: &RiskAnalysis, repayment: bool) -> u64 {
        if !analysis.immediate_action {
            BPS_DIVISOR
        } else if repayment || analysis.metrics.would_fail_solvency {
            IMMEDIATE_REPAY_MULTIPLIER_BPS
        } else {
            IMMEDIATE_COLLATERAL_MULTIPLIER_BPS
        }
    }

    /// Display-only estimate of the health factor after spending `amount`.
    ///
    /// Spending the full cap is assumed to add 0.5 to the health factor. The
    /// next cycle re-reads the real position, so nothing depends on this value.
    pub fn estimate_health_factor(analysis: &RiskAnalysis, amount: u128, cap: u128) -> FixedPoint {
        let old = analysis.metrics.health_factor;
        if old.is_infinite() || amount == 0 || cap == 0 {
            return old;
        }

        let mut gain_bps = mul_div_saturating(amount.min(cap), FULL_CAP_HF_GAIN_BPS as u128, cap) as u64;
        gain_bps = match analysis.category {
            RiskCategory::Leverage => apply_bps(gain_bps as u128, LEVERAGE_ESTIMATE_BPS) as u64,
            RiskCategory::Soft => apply_bps(gain_bps as u128, SOFT_ESTIMATE_BPS) as u64,
            _ => gain_bps,
        };
        if analysis.metrics.ltv_bps >= SOLVENCY_LTV_BPS {
            gain_bps = apply_bps(gain_bps as u128, HIGH_LTV_ESTIMATE_BPS) as u64;
        }

        old.saturating_add(FixedPoint::from_bps(gain_bps))
    }
}
