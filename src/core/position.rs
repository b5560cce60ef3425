//! Position snapshots read from the lending protocol.
//!
//! A market holds two tokens (X and Y) plus liquidity shares (L) minted by
//! liquidity providers. A user can deposit and borrow any of the three classes.
//! Snapshots are read fresh before every analysis and never stored.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::ids::{Address, MarketId};
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// ASSET CLASSES
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw amounts held per asset class: liquidity shares, token X and token Y
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAmounts {
    /// Liquidity shares
    pub liquidity: u128,
    /// Token X
    pub x: u128,
    /// Token Y
    pub y: u128,
}

impl ClassAmounts {
    /// Create from the three class amounts
    pub fn new(liquidity: u128, x: u128, y: u128) -> Self {
        Self { liquidity, x, y }
    }

    /// Only token Y
    pub fn y_only(y: u128) -> Self {
        Self { liquidity: 0, x: 0, y }
    }

    /// Sum of raw amounts, saturating
    pub fn total(&self) -> u128 {
        self.liquidity.saturating_add(self.x).saturating_add(self.y)
    }

    /// True if every class is empty
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUATION DATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Price-range and liquidity metadata used for precise valuation.
///
/// Prices are quoted as Y per X. Collateral in X is valued at the low end of
/// the range and debt in X at the high end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationData {
    /// Lowest X price over the observation window
    pub price_min: FixedPoint,
    /// Highest X price over the observation window
    pub price_max: FixedPoint,
    /// Y value of one liquidity share at the active price
    pub active_liquidity_scaler: FixedPoint,
    /// Market reserve of X
    pub reserve_x: u128,
    /// Market reserve of Y
    pub reserve_y: u128,
}

impl ValuationData {
    /// Reject data the precise path cannot use
    pub fn validate(&self) -> Result<()> {
        if self.price_min.is_zero() {
            return Err(Error::MalformedValuation("zero minimum price".into()));
        }
        if self.price_min > self.price_max {
            return Err(Error::MalformedValuation(format!(
                "price range inverted: min {} > max {}",
                self.price_min, self.price_max
            )));
        }
        if self.price_max.is_infinite() {
            return Err(Error::MalformedValuation("unbounded maximum price".into()));
        }
        if self.active_liquidity_scaler.is_zero() {
            return Err(Error::MalformedValuation("zero liquidity scaler".into()));
        }
        Ok(())
    }

    /// Market liquidity expressed in Y at the low end of the range
    pub fn liquidity_in_y(&self) -> u128 {
        self.reserve_y
            .saturating_add(self.price_min.mul_amount(self.reserve_x))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// One user's position in one market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Position owner
    pub user: Address,
    /// Market the position lives in
    pub market: MarketId,
    /// Deposited collateral per class
    pub deposits: ClassAmounts,
    /// Outstanding debt per class
    pub borrows: ClassAmounts,
    /// Precise valuation inputs, when the protocol exposes them
    #[serde(default)]
    pub valuation: Option<ValuationData>,
}

impl PositionSnapshot {
    /// Empty position
    pub fn empty(user: Address, market: MarketId) -> Self {
        Self {
            user,
            market,
            deposits: ClassAmounts::default(),
            borrows: ClassAmounts::default(),
            valuation: None,
        }
    }

    /// Simple position with only token Y on both sides
    pub fn simple(user: Address, market: MarketId, collateral: u128, debt: u128) -> Self {
        Self {
            deposits: ClassAmounts::y_only(collateral),
            borrows: ClassAmounts::y_only(debt),
            ..Self::empty(user, market)
        }
    }

    /// Attach valuation data
    pub fn with_valuation(mut self, valuation: ValuationData) -> Self {
        self.valuation = Some(valuation);
        self
    }

    /// Sum of raw deposits
    pub fn total_collateral(&self) -> u128 {
        self.deposits.total()
    }

    /// Sum of raw borrows
    pub fn total_debt(&self) -> u128 {
        self.borrows.total()
    }

    /// True if any liquidity shares are borrowed
    pub fn has_liquidity_debt(&self) -> bool {
        self.borrows.liquidity > 0
    }

    /// True if anything is borrowed
    pub fn has_borrow(&self) -> bool {
        !self.borrows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valuation() -> ValuationData {
        ValuationData {
            price_min: FixedPoint::from_integer(2),
            price_max: FixedPoint::from_integer(3),
            active_liquidity_scaler: FixedPoint::from_integer(4),
            reserve_x: 1_000,
            reserve_y: 5_000,
        }
    }

    #[test]
    fn test_class_amounts() {
        let amounts = ClassAmounts::new(1, 2, 3);
        assert_eq!(amounts.total(), 6);
        assert_eq!(ClassAmounts::y_only(7).total(), 7);
        assert!(ClassAmounts::default().is_empty());
    }

    #[test]
    fn test_snapshot_totals() {
        let user = Address::derive("alice");
        let market = MarketId::derive("m");
        let mut pos = PositionSnapshot::simple(user, market, 1000, 500);
        assert_eq!(pos.total_collateral(), 1000);
        assert_eq!(pos.total_debt(), 500);
        assert!(pos.has_borrow());
        assert!(!pos.has_liquidity_debt());

        pos.borrows.liquidity = 1;
        assert!(pos.has_liquidity_debt());
    }

    #[test]
    fn test_valuation_validation() {
        assert!(valuation().validate().is_ok());

        let mut v = valuation();
        v.price_min = FixedPoint::ZERO;
        assert!(matches!(v.validate(), Err(Error::MalformedValuation(_))));

        let mut v = valuation();
        v.price_min = FixedPoint::from_integer(5);
        assert!(v.validate().is_err());

        let mut v = valuation();
        v.active_liquidity_scaler = FixedPoint::ZERO;
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_liquidity_in_y() {
        // 5000 Y + 1000 X * 2
        assert_eq!(valuation().liquidity_in_y(), 7_000);
    }
}
