//! In-memory lending protocol and token vault.
//!
//! Used by tests, the CLI simulation and the HTTP server. Both stores can be
//! told to fail so the engine's failure handling can be exercised.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::core::position::{PositionSnapshot, ValuationData};
use crate::error::{Error, Result};
use crate::lending::{LendingProtocol, TokenVault};
use crate::utils::ids::{Address, AssetId, MarketId};
use crate::utils::math::{mul_div_saturating, FixedPoint};

fn lock_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Lock(e.to_string())
}

// ═══════════════════════════════════════════════════════════════════════════════
// LENDING PROTOCOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of protocol call recorded by [`InMemoryLending`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolCallKind {
    /// Collateral deposit
    Deposit,
    /// Token debt repayment
    Repay,
    /// Liquidity debt repayment
    RepayLiquidity,
}

/// A protocol call performed on a user's behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCall {
    /// Call kind
    pub kind: ProtocolCallKind,
    /// Position owner
    pub user: Address,
    /// Market
    pub market: MarketId,
    /// Asset supplied
    pub asset: AssetId,
    /// Amount supplied
    pub amount: u128,
}

#[derive(Debug, Clone)]
struct Market {
    assets: (AssetId, AssetId),
    valuation: Option<ValuationData>,
}

/// In-memory lending protocol
#[derive(Debug, Default)]
pub struct InMemoryLending {
    markets: RwLock<HashMap<MarketId, Market>>,
    positions: RwLock<HashMap<(Address, MarketId), PositionSnapshot>>,
    unreadable: RwLock<HashSet<(Address, MarketId)>>,
    reject_calls: AtomicBool,
    calls: RwLock<Vec<ProtocolCall>>,
}

impl InMemoryLending {
    /// Create an empty protocol
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a market with its two tokens
    pub fn add_market(&self, market: MarketId, x: AssetId, y: AssetId) -> Result<()> {
        let mut markets = self.markets.write().map_err(lock_err)?;
        markets.insert(market, Market { assets: (x, y), valuation: None });
        Ok(())
    }

    /// Attach valuation data returned with every position in `market`
    pub fn set_valuation(&self, market: MarketId, valuation: Option<ValuationData>) -> Result<()> {
        let mut markets = self.markets.write().map_err(lock_err)?;
        let entry = markets
            .get_mut(&market)
            .ok_or_else(|| Error::InvalidMarket(market.to_hex()))?;
        entry.valuation = valuation;
        Ok(())
    }

    /// Overwrite a user's position
    pub fn set_position(&self, position: PositionSnapshot) -> Result<()> {
        let mut positions = self.positions.write().map_err(lock_err)?;
        positions.insert((position.user, position.market), position);
        Ok(())
    }

    /// Make reads of one position fail
    pub fn set_unreadable(&self, user: Address, market: MarketId, unreadable: bool) -> Result<()> {
        let mut set = self.unreadable.write().map_err(lock_err)?;
        if unreadable {
            set.insert((user, market));
        } else {
            set.remove(&(user, market));
        }
        Ok(())
    }

    /// Make every remediation call fail
    pub fn set_reject_calls(&self, reject: bool) {
        self.reject_calls.store(reject, Ordering::SeqCst);
    }

    /// Calls performed so far
    pub fn calls(&self) -> Result<Vec<ProtocolCall>> {
        Ok(self.calls.read().map_err(lock_err)?.clone())
    }

    fn market(&self, market: MarketId) -> Result<Market> {
        let markets = self.markets.read().map_err(lock_err)?;
        markets
            .get(&market)
            .cloned()
            .ok_or_else(|| Error::InvalidMarket(market.to_hex()))
    }

    fn apply<F>(&self, call: ProtocolCall, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut PositionSnapshot, &Market),
    {
        if self.reject_calls.load(Ordering::SeqCst) {
            return Err(Error::ProtocolCallFailed(format!("{:?} rejected", call.kind)));
        }
        let market = self.market(call.market)?;
        {
            let mut positions = self.positions.write().map_err(lock_err)?;
            let position = positions
                .entry((call.user, call.market))
                .or_insert_with(|| PositionSnapshot::empty(call.user, call.market));
            mutate(position, &market);
        }
        self.calls.write().map_err(lock_err)?.push(call);
        Ok(())
    }
}

impl LendingProtocol for InMemoryLending {
    fn market_assets(&self, market: MarketId) -> Result<(AssetId, AssetId)> {
        Ok(self.market(market)?.assets)
    }

    fn get_position(&self, user: Address, market: MarketId) -> Result<PositionSnapshot> {
        if self.unreadable.read().map_err(lock_err)?.contains(&(user, market)) {
            return Err(Error::PositionFetch(format!("read of {} reverted", user.short())));
        }
        let info = self.market(market)?;
        let positions = self.positions.read().map_err(lock_err)?;
        let mut position = positions
            .get(&(user, market))
            .cloned()
            .unwrap_or_else(|| PositionSnapshot::empty(user, market));
        if position.valuation.is_none() {
            position.valuation = info.valuation;
        }
        Ok(position)
    }

    fn deposit(&self, user: Address, market: MarketId, asset: AssetId, amount: u128) -> Result<()> {
        let call = ProtocolCall { kind: ProtocolCallKind::Deposit, user, market, asset, amount };
        self.apply(call, |position, info| {
            if asset == info.assets.0 {
                position.deposits.x = position.deposits.x.saturating_add(amount);
            } else {
                position.deposits.y = position.deposits.y.saturating_add(amount);
            }
        })
    }

    fn repay(&self, user: Address, market: MarketId, asset: AssetId, amount: u128) -> Result<()> {
        let call = ProtocolCall { kind: ProtocolCallKind::Repay, user, market, asset, amount };
        self.apply(call, |position, info| {
            if asset == info.assets.0 {
                position.borrows.x = position.borrows.x.saturating_sub(amount);
            } else {
                position.borrows.y = position.borrows.y.saturating_sub(amount);
            }
        })
    }

    fn repay_liquidity(
        &self,
        user: Address,
        market: MarketId,
        asset: AssetId,
        amount: u128,
    ) -> Result<()> {
        let call = ProtocolCall { kind: ProtocolCallKind::RepayLiquidity, user, market, asset, amount };
        self.apply(call, |position, info| {
            // Value the payment in Y, then convert to shares at the active scaler
            let shares = match info.valuation.or(position.valuation) {
                Some(v) => {
                    let in_y = if asset == info.assets.0 {
                        v.price_min.mul_amount(amount)
                    } else {
                        amount
                    };
                    mul_div_saturating(in_y, FixedPoint::SCALE, v.active_liquidity_scaler.raw().max(1))
                }
                None => amount,
            };
            position.borrows.liquidity = position.borrows.liquidity.saturating_sub(shares);
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN VAULT
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory token balances and allowances
#[derive(Debug, Default)]
pub struct InMemoryVault {
    balances: RwLock<HashMap<(Address, AssetId), u128>>,
    allowances: RwLock<HashMap<(Address, Address, AssetId), u128>>,
    fail_transfers: AtomicBool,
}

impl InMemoryVault {
    /// Create an empty vault
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `owner` with `amount`
    pub fn mint(&self, owner: Address, asset: AssetId, amount: u128) -> Result<()> {
        let mut balances = self.balances.write().map_err(lock_err)?;
        let balance = balances.entry((owner, asset)).or_insert(0);
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    /// Set the allowance `owner` grants `spender`
    pub fn approve(&self, owner: Address, spender: Address, asset: AssetId, amount: u128) -> Result<()> {
        let mut allowances = self.allowances.write().map_err(lock_err)?;
        allowances.insert((owner, spender, asset), amount);
        Ok(())
    }

    /// Make every transfer fail
    pub fn set_fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }
}

impl TokenVault for InMemoryVault {
    fn balance_of(&self, owner: Address, asset: AssetId) -> Result<u128> {
        let balances = self.balances.read().map_err(lock_err)?;
        Ok(balances.get(&(owner, asset)).copied().unwrap_or(0))
    }

    fn allowance(&self, owner: Address, spender: Address, asset: AssetId) -> Result<u128> {
        let allowances = self.allowances.read().map_err(lock_err)?;
        Ok(allowances.get(&(owner, spender, asset)).copied().unwrap_or(0))
    }

    fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        asset: AssetId,
        amount: u128,
    ) -> Result<()> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(Error::TransferFailed(format!("token {} paused", asset.short())));
        }

        let mut allowances = self.allowances.write().map_err(lock_err)?;
        let mut balances = self.balances.write().map_err(lock_err)?;

        let granted = allowances.get(&(from, spender, asset)).copied().unwrap_or(0);
        if granted < amount {
            return Err(Error::InsufficientAuthorization { required: amount, granted });
        }
        let available = balances.get(&(from, asset)).copied().unwrap_or(0);
        if available < amount {
            return Err(Error::InsufficientBalance { required: amount, available });
        }

        allowances.insert((from, spender, asset), granted - amount);
        balances.insert((from, asset), available - amount);
        let credit = balances.entry((to, asset)).or_insert(0);
        *credit = credit.saturating_add(amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (InMemoryLending, MarketId, AssetId, AssetId, Address) {
        let lending = InMemoryLending::new();
        let market = MarketId::derive("weth-usdc");
        let (weth, usdc) = (AssetId::derive("weth"), AssetId::derive("usdc"));
        lending.add_market(market, weth, usdc).unwrap();
        (lending, market, weth, usdc, Address::derive("alice"))
    }

    #[test]
    fn test_unknown_market() {
        let (lending, _, _, _, user) = setup();
        let other = MarketId::derive("other");
        assert!(matches!(lending.market_assets(other), Err(Error::InvalidMarket(_))));
        assert!(lending.get_position(user, other).is_err());
    }

    #[test]
    fn test_deposit_and_repay() {
        let (lending, market, weth, usdc, user) = setup();
        lending
            .set_position(PositionSnapshot::simple(user, market, 1000, 900))
            .unwrap();

        lending.deposit(user, market, usdc, 100).unwrap();
        lending.deposit(user, market, weth, 5).unwrap();
        lending.repay(user, market, usdc, 300).unwrap();

        let pos = lending.get_position(user, market).unwrap();
        assert_eq!(pos.deposits.y, 1100);
        assert_eq!(pos.deposits.x, 5);
        assert_eq!(pos.borrows.y, 600);
        assert_eq!(lending.calls().unwrap().len(), 3);
    }

    #[test]
    fn test_repay_liquidity_without_valuation() {
        let (lending, market, _, usdc, user) = setup();
        let mut pos = PositionSnapshot::simple(user, market, 1000, 0);
        pos.borrows.liquidity = 500;
        lending.set_position(pos).unwrap();

        lending.repay_liquidity(user, market, usdc, 200).unwrap();
        assert_eq!(lending.get_position(user, market).unwrap().borrows.liquidity, 300);
    }

    #[test]
    fn test_failure_injection() {
        let (lending, market, _, usdc, user) = setup();
        lending.set_unreadable(user, market, true).unwrap();
        assert!(matches!(lending.get_position(user, market), Err(Error::PositionFetch(_))));
        lending.set_unreadable(user, market, false).unwrap();
        assert!(lending.get_position(user, market).is_ok());

        lending.set_reject_calls(true);
        assert!(matches!(
            lending.deposit(user, market, usdc, 1),
            Err(Error::ProtocolCallFailed(_))
        ));
        assert!(lending.calls().unwrap().is_empty());
    }

    #[test]
    fn test_vault_transfer_from() {
        let vault = InMemoryVault::new();
        let (owner, spender, custody) = (Address::derive("o"), Address::derive("s"), Address::derive("c"));
        let usdc = AssetId::derive("usdc");

        vault.mint(owner, usdc, 1000).unwrap();
        assert!(matches!(
            vault.transfer_from(spender, owner, custody, usdc, 100),
            Err(Error::InsufficientAuthorization { required: 100, granted: 0 })
        ));

        vault.approve(owner, spender, usdc, 2000).unwrap();
        vault.transfer_from(spender, owner, custody, usdc, 400).unwrap();
        assert_eq!(vault.balance_of(owner, usdc).unwrap(), 600);
        assert_eq!(vault.balance_of(custody, usdc).unwrap(), 400);
        assert_eq!(vault.allowance(owner, spender, usdc).unwrap(), 1600);

        assert!(matches!(
            vault.transfer_from(spender, owner, custody, usdc, 700),
            Err(Error::InsufficientBalance { required: 700, available: 600 })
        ));

        vault.set_fail_transfers(true);
        assert!(matches!(
            vault.transfer_from(spender, owner, custody, usdc, 1),
            Err(Error::TransferFailed(_))
        ));
    }
}
