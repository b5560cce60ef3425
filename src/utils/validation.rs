//! Input validation for subscription parameters.
//!
//! Checks that need only the request itself live here. Checks that need the
//! lending protocol (market existence, open borrow position) run in the ledger.

use crate::error::{Error, Result};
use crate::utils::constants::MIN_HEALTH_FACTOR_THRESHOLD;
use crate::utils::ids::{AssetId, MarketId};
use crate::utils::math::FixedPoint;

// ═══════════════════════════════════════════════════════════════════════════════
// RATIO VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate `target > threshold > 1.0`
pub fn validate_health_factors(threshold: FixedPoint, target: FixedPoint) -> Result<()> {
    if threshold.raw() <= MIN_HEALTH_FACTOR_THRESHOLD {
        return Err(Error::ThresholdTooLow {
            threshold: threshold.raw(),
        });
    }
    if target <= threshold {
        return Err(Error::TargetNotAboveThreshold {
            target: target.raw(),
            threshold: threshold.raw(),
        });
    }
    if target.is_infinite() {
        return Err(Error::InvalidParameter {
            name: "target_health_factor".into(),
            reason: "target must be finite".into(),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNT & ASSET VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate the spending cap is non-zero
pub fn validate_max_amount(max_amount: u128) -> Result<()> {
    if max_amount == 0 {
        return Err(Error::ZeroMaxAmount);
    }
    Ok(())
}

/// Validate the protection asset is one of the market's two tokens
pub fn validate_protection_asset(
    asset: AssetId,
    market: MarketId,
    market_assets: (AssetId, AssetId),
) -> Result<()> {
    if asset.is_zero() || (asset != market_assets.0 && asset != market_assets.1) {
        return Err(Error::InvalidAsset {
            asset: asset.to_hex(),
            market: market.to_hex(),
        });
    }
    Ok(())
}

/// Validate a market identifier is set
pub fn validate_market_id(market: MarketId) -> Result<()> {
    if market.is_zero() {
        return Err(Error::InvalidMarket(market.to_hex()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_health_factors() {
        let hf = FixedPoint::from_bps;
        assert!(validate_health_factors(hf(12_000), hf(15_000)).is_ok());
        assert!(matches!(
            validate_health_factors(hf(10_000), hf(15_000)),
            Err(Error::ThresholdTooLow { .. })
        ));
        assert!(matches!(
            validate_health_factors(hf(9_000), hf(15_000)),
            Err(Error::ThresholdTooLow { .. })
        ));
        assert!(matches!(
            validate_health_factors(hf(15_000), hf(15_000)),
            Err(Error::TargetNotAboveThreshold { .. })
        ));
        assert!(validate_health_factors(hf(12_000), FixedPoint::INFINITE).is_err());
    }

    #[test]
    fn test_validate_max_amount() {
        assert_eq!(validate_max_amount(0), Err(Error::ZeroMaxAmount));
        assert!(validate_max_amount(1).is_ok());
    }

    #[test]
    fn test_validate_protection_asset() {
        let market = MarketId::derive("weth-usdc");
        let weth = AssetId::derive("weth");
        let usdc = AssetId::derive("usdc");
        let dai = AssetId::derive("dai");

        assert!(validate_protection_asset(usdc, market, (weth, usdc)).is_ok());
        assert!(validate_protection_asset(weth, market, (weth, usdc)).is_ok());
        assert!(matches!(
            validate_protection_asset(dai, market, (weth, usdc)),
            Err(Error::InvalidAsset { .. })
        ));
        assert!(validate_protection_asset(AssetId::zero(), market, (weth, usdc)).is_err());
    }

    #[test]
    fn test_validate_market_id() {
        assert!(validate_market_id(MarketId::zero()).is_err());
        assert!(validate_market_id(MarketId::derive("m")).is_ok());
    }
}
