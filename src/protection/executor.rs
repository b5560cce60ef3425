//! Remediation execution.
//!
//! Checks the user's balance and spending authorization, moves the planned
//! amount into protocol custody, then invokes the chosen protocol action on the
//! user's behalf. Funds already moved when the protocol call fails are not
//! returned; the attempt counts as failed and still consumes the cooldown.

use std::sync::Arc;
use tracing::debug;

use crate::core::subscription::Subscription;
use crate::error::{Error, Result};
use crate::lending::{LendingProtocol, TokenVault};
use crate::protection::planner::{RemediationAction, RemediationPlan};
use crate::utils::ids::Address;

/// Performs transfers and protocol calls for a remediation plan
pub struct RemediationExecutor<P: LendingProtocol, V: TokenVault> {
    protocol: Arc<P>,
    vault: Arc<V>,
    /// Account users authorize as spender
    engine: Address,
    /// Protocol custody receiving the funds
    custody: Address,
}

impl<P: LendingProtocol, V: TokenVault> RemediationExecutor<P, V> {
    /// Create an executor
    pub fn new(protocol: Arc<P>, vault: Arc<V>, engine: Address, custody: Address) -> Self {
        Self { protocol, vault, engine, custody }
    }

    /// Execute `plan` for the subscription's owner; returns the amount used
    pub fn execute(&self, subscription: &Subscription, plan: &RemediationPlan) -> Result<u128> {
        if plan.is_empty() {
            return Ok(0);
        }

        let user = subscription.user;
        let asset = subscription.protection_asset;
        let amount = plan.amount;

        let available = self.vault.balance_of(user, asset)?;
        if available < amount {
            return Err(Error::InsufficientBalance { required: amount, available });
        }
        let granted = self.vault.allowance(user, self.engine, asset)?;
        if granted < amount {
            return Err(Error::InsufficientAuthorization { required: amount, granted });
        }

        self.vault
            .transfer_from(self.engine, user, self.custody, asset, amount)
            .map_err(|e| match e {
                Error::InsufficientBalance { .. } | Error::InsufficientAuthorization { .. } => e,
                Error::TransferFailed(_) => e,
                other => Error::TransferFailed(other.to_string()),
            })?;

        debug!("Moved {} of {} into custody for {}", amount, asset.short(), user.short());

        let market = subscription.market;
        let result = match plan.action {
            RemediationAction::DepositCollateral => self.protocol.deposit(user, market, asset, amount),
            RemediationAction::RepayDebt => self.protocol.repay(user, market, asset, amount),
            RemediationAction::RepayLiquidity { .. } => {
                self.protocol.repay_liquidity(user, market, asset, amount)
            }
        };
        result.map_err(|e| match e {
            Error::ProtocolCallFailed(_) => e,
            other => Error::ProtocolCallFailed(other.to_string()),
        })?;

        Ok(amount)
    }
}
