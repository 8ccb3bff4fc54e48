//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Prices, commissions and P&L all flow through this wrapper so that
//! thousands of accumulated fills never pick up binary floating-point drift.

use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Fixed-point decimal used for every price and money amount.
///
/// Serializes to a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Parse a money-ish field from a broker export.
    ///
    /// Accepts a leading `$`, thousands separators and surrounding whitespace,
    /// e.g. `"$1,234.50"`.
    pub fn parse_money(s: &str) -> Result<Self, rust_decimal::Error> {
        let cleaned: String = s
            .trim()
            .chars()
            .filter(|c| *c != '$' && *c != ',')
            .collect();
        Self::from_str_canonical(&cleaned)
    }

    /// Format as a canonical string (no exponent, no trailing zeros).
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Lift an integer contract count into decimal space.
    pub fn from_qty(qty: i64) -> Self {
        Decimal(RustDecimal::from(qty))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

impl Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

impl<'a> Sum<&'a Decimal> for Decimal {
    fn sum<I: Iterator<Item = &'a Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + *d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_money_strips_currency_and_separators() {
        assert_eq!(
            Decimal::parse_money(" $1,234.50 ").unwrap(),
            Decimal::from_str_canonical("1234.5").unwrap()
        );
        assert_eq!(
            Decimal::parse_money("0.62").unwrap(),
            Decimal::from_str_canonical("0.62").unwrap()
        );
        assert!(Decimal::parse_money("abc").is_err());
    }

    #[test]
    fn test_canonical_string_drops_trailing_zeros() {
        let d = Decimal::from_str_canonical("17250.2500").unwrap();
        assert_eq!(d.to_canonical_string(), "17250.25");
    }

    #[test]
    fn test_no_drift_over_many_small_commissions() {
        let fee = Decimal::from_str_canonical("0.1").unwrap();
        let total: Decimal = std::iter::repeat(fee).take(10_000).sum();
        assert_eq!(total, Decimal::from_qty(1000));
    }

    #[test]
    fn test_from_qty_and_arithmetic() {
        let px = Decimal::from_str_canonical("100.25").unwrap();
        let notional = px * Decimal::from_qty(4);
        assert_eq!(notional.to_canonical_string(), "401");
        assert_eq!((-notional).abs(), notional);
        assert!((-notional).is_negative());
    }

    #[test]
    fn test_decimal_json_is_number() {
        let d = Decimal::from_str_canonical("98.5").unwrap();
        let json = serde_json::to_value(d).unwrap();
        assert!(json.is_number());
    }
}
