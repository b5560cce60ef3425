//! Interfaces to the external lending protocol and token primitive.
//!
//! The engine only needs a narrow surface:
//! - **LendingProtocol**: read a position, list a market's tokens, and perform
//!   the three remediation actions on a user's behalf
//! - **TokenVault**: balances, spending authorizations and authorized transfers
//!
//! `memory` provides in-process implementations with failure injection.

pub mod memory;

pub use memory::*;

use crate::core::position::PositionSnapshot;
use crate::error::Result;
use crate::utils::ids::{Address, AssetId, MarketId};

/// Lending protocol operations used by the engine
pub trait LendingProtocol: Send + Sync {
    /// The market's two tokens (X, Y); `InvalidMarket` if unknown
    fn market_assets(&self, market: MarketId) -> Result<(AssetId, AssetId)>;

    /// Current position of `user` in `market`
    fn get_position(&self, user: Address, market: MarketId) -> Result<PositionSnapshot>;

    /// Deposit `amount` of `asset` as collateral for `user`
    fn deposit(&self, user: Address, market: MarketId, asset: AssetId, amount: u128) -> Result<()>;

    /// Repay `amount` of `asset` debt for `user`
    fn repay(&self, user: Address, market: MarketId, asset: AssetId, amount: u128) -> Result<()>;

    /// Repay borrowed liquidity shares for `user` using `amount` of `asset`
    fn repay_liquidity(
        &self,
        user: Address,
        market: MarketId,
        asset: AssetId,
        amount: u128,
    ) -> Result<()>;
}

/// Fungible token balances and authorizations
pub trait TokenVault: Send + Sync {
    /// Balance of `owner`
    fn balance_of(&self, owner: Address, asset: AssetId) -> Result<u128>;

    /// Amount `spender` may move on behalf of `owner`
    fn allowance(&self, owner: Address, spender: Address, asset: AssetId) -> Result<u128>;

    /// Move `amount` from `from` to `to`, consuming `spender`'s allowance
    fn transfer_from(
        &self,
        spender: Address,
        from: Address,
        to: Address,
        asset: AssetId,
        amount: u128,
    ) -> Result<()>;
}
