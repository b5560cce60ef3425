//! Fixed-point arithmetic and mathematical utilities.
//!
//! Token quantities are raw `u128` units. Ratios (health factor, leverage,
//! utilization) are [`FixedPoint`] values with 18 decimals. Products of two raw
//! amounts can exceed `u128`, so every ratio goes through [`mul_div`], which keeps
//! a 256-bit intermediate.

use crate::error::{Error, Result};
use crate::utils::constants::{BPS_DIVISOR, RATIO_SCALE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-point number with 18 decimal places precision.
///
/// `FixedPoint::INFINITE` is reserved for ratios whose denominator is zero,
/// such as the health factor of a position without debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedPoint(u128);

impl FixedPoint {
    /// Scale factor: 10^18
    pub const SCALE: u128 = RATIO_SCALE;

    /// Zero value
    pub const ZERO: Self = Self(0);

    /// One (1.0)
    pub const ONE: Self = Self(Self::SCALE);

    /// Unbounded ratio
    pub const INFINITE: Self = Self(u128::MAX);

    /// Create a new FixedPoint from raw value
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Create from an integer (scales up)
    pub fn from_integer(value: u64) -> Self {
        Self((value as u128) * Self::SCALE)
    }

    /// Create from basis points (100 bps = 1%)
    pub fn from_bps(bps: u64) -> Self {
        Self((bps as u128) * Self::SCALE / (BPS_DIVISOR as u128))
    }

    /// Ratio of two raw quantities. A zero denominator yields `INFINITE`,
    /// as does a quotient too large to represent.
    pub fn ratio(numerator: u128, denominator: u128) -> Self {
        if denominator == 0 {
            return Self::INFINITE;
        }
        Self(mul_div_saturating(numerator, Self::SCALE, denominator))
    }

    /// Get the raw underlying value
    pub fn raw(&self) -> u128 {
        self.0
    }

    /// Check if value is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Check if value is the infinite sentinel
    pub fn is_infinite(&self) -> bool {
        self.0 == u128::MAX
    }

    /// Convert to basis points, rounding down and saturating at `u64::MAX`
    pub fn to_bps(&self) -> u64 {
        let bps = mul_div_saturating(self.0, BPS_DIVISOR as u128, Self::SCALE);
        bps.min(u64::MAX as u128) as u64
    }

    /// Scale a raw quantity by this ratio, saturating on overflow
    pub fn mul_amount(&self, amount: u128) -> u128 {
        mul_div_saturating(amount, self.0, Self::SCALE)
    }

    /// Saturating addition
    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction
    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Minimum of two values
    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    /// Maximum of two values
    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    /// Decimal rendering for human-facing output. `None` for the infinite sentinel.
    pub fn to_decimal(&self) -> Option<Decimal> {
        if self.is_infinite() {
            return None;
        }
        let whole = self.0 / Self::SCALE;
        let frac = (self.0 % Self::SCALE) / 100_000_000_000_000; // keep 4 decimals
        let whole = i64::try_from(whole).ok()?;
        Some(Decimal::from(whole) + Decimal::new(frac as i64, 4))
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal() {
            Some(d) => write!(f, "{}", d),
            None => write!(f, "inf"),
        }
    }
}

impl Add for FixedPoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub for FixedPoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl Mul for FixedPoint {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Self(mul_div_saturating(self.0, rhs.0, Self::SCALE))
    }
}

impl Div for FixedPoint {
    type Output = Self;

    fn div(self, rhs: Self) -> Self::Output {
        Self::ratio(self.0, rhs.0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WIDE MULTIPLY-DIVIDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Full 128x128 bit product as (high, low) words
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);

    let lo_lo = a_lo * b_lo;
    let lo_hi = a_lo * b_hi;
    let hi_lo = a_hi * b_lo;
    let hi_hi = a_hi * b_hi;

    let mid = (lo_lo >> 64) + (lo_hi & MASK) + (hi_lo & MASK);
    let low = (lo_lo & MASK) | (mid << 64);
    let high = hi_hi + (lo_hi >> 64) + (hi_lo >> 64) + (mid >> 64);
    (high, low)
}

/// Computes `(a * b) / c` with a 256-bit intermediate.
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("({} * {}) / 0", a, b),
        });
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / c);
    }

    let (high, low) = widening_mul(a, b);
    if high >= c {
        return Err(Error::Overflow {
            operation: format!("({} * {}) / {}", a, b, c),
        });
    }

    // Long division of (high, low) by c; remainder stays below c throughout
    let mut remainder = high;
    let mut quotient = 0u128;
    for bit in (0..128).rev() {
        let carry = remainder >> 127;
        remainder = (remainder << 1) | ((low >> bit) & 1);
        if carry == 1 || remainder >= c {
            remainder = remainder.wrapping_sub(c);
            quotient |= 1u128 << bit;
        }
    }
    Ok(quotient)
}

/// `(a * b) / c`, saturating at `u128::MAX` on overflow or a zero divisor
pub fn mul_div_saturating(a: u128, b: u128, c: u128) -> u128 {
    mul_div(a, b, c).unwrap_or(u128::MAX)
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASIS POINT HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Scale an amount by a basis-point factor (10000 = x1.0), saturating
pub fn apply_bps(amount: u128, bps: u64) -> u128 {
    mul_div_saturating(amount, bps as u128, BPS_DIVISOR as u128)
}

/// `part / whole` in basis points; `None` when `whole` is zero
pub fn bps_of(part: u128, whole: u128) -> Option<u64> {
    if whole == 0 {
        return None;
    }
    let bps = mul_div_saturating(part, BPS_DIVISOR as u128, whole);
    Some(bps.min(u64::MAX as u128) as u64)
}

/// Linear ramp from 0 at `start` to `MAX` bps at `end`, clamped at both ends
pub fn linear_ramp_bps(value: u64, start: u64, end: u64) -> u64 {
    if value <= start || end <= start {
        return 0;
    }
    let progressed = (value - start) as u128;
    let span = (end - start) as u128;
    (progressed * BPS_DIVISOR as u128 / span).min(BPS_DIVISOR as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_point_basic() {
        let one = FixedPoint::ONE;
        let two = FixedPoint::from_integer(2);

        assert_eq!(one + one, two);
        assert_eq!(two - one, one);
        assert_eq!(one * two, two);
        assert_eq!(two / one, two);
    }

    #[test]
    fn test_fixed_point_from_bps() {
        let half = FixedPoint::from_bps(5000);
        assert_eq!(FixedPoint::ONE * half, FixedPoint::from_raw(FixedPoint::SCALE / 2));
        assert_eq!(half.to_bps(), 5000);
    }

    #[test]
    fn test_ratio_zero_denominator_is_infinite() {
        assert!(FixedPoint::ratio(1000, 0).is_infinite());
        assert!(FixedPoint::ratio(0, 0).is_infinite());
        assert_eq!(FixedPoint::ratio(1000, 500), FixedPoint::from_integer(2));
    }

    #[test]
    fn test_ratio_large_amounts() {
        // 1e30 raw units each side would overflow a naive u128 product with the scale
        let big = 1_000_000_000_000_000_000_000_000_000_000u128;
        assert_eq!(FixedPoint::ratio(big, big), FixedPoint::ONE);
        assert_eq!(FixedPoint::ratio(big * 3, big * 2), FixedPoint::from_bps(15_000));
    }

    #[test]
    fn test_mul_div_errors() {
        assert!(matches!(mul_div(1, 2, 0), Err(Error::DivisionByZero { .. })));
        assert!(matches!(mul_div(u128::MAX, u128::MAX, 1), Err(Error::Overflow { .. })));
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX).unwrap(), u128::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(FixedPoint::from_bps(11_111).to_string(), "1.1111");
        assert_eq!(FixedPoint::INFINITE.to_string(), "inf");
    }

    #[test]
    fn test_bps_helpers() {
        assert_eq!(apply_bps(1000, 15_000), 1500);
        assert_eq!(bps_of(900, 1000), Some(9000));
        assert_eq!(bps_of(1, 0), None);
        assert_eq!(linear_ramp_bps(8250, 7500, 9000), 5000);
        assert_eq!(linear_ramp_bps(7000, 7500, 9000), 0);
        assert_eq!(linear_ramp_bps(9500, 7500, 9000), 10_000);
    }

    proptest! {
        #[test]
        fn prop_mul_div_matches_narrow(a in 0u64..u64::MAX, b in 0u64..u64::MAX, c in 1u64..u64::MAX) {
            let expected = (a as u128) * (b as u128) / (c as u128);
            prop_assert_eq!(mul_div(a as u128, b as u128, c as u128).unwrap(), expected);
        }

        #[test]
        fn prop_mul_div_wide_identity(a in 1u128..u128::MAX, b in 1u128..u128::MAX) {
            prop_assert_eq!(mul_div(a, b, b).unwrap(), a);
        }
    }
}
