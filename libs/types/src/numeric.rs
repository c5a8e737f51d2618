//! Fixed-point decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Values are normalized on construction so `100` and `100.00` compare,
//! hash and print identically. Both types re-validate on deserialization.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when constructing a numeric value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("price must be strictly positive, got {0}")]
    NonPositivePrice(Decimal),

    #[error("quantity must not be negative, got {0}")]
    NegativeQuantity(Decimal),

    #[error("cannot parse decimal from {0:?}")]
    Parse(String),
}

/// A strictly positive limit or execution price
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    /// Create a price, returning None unless `value > 0`
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value.normalize()))
        } else {
            None
        }
    }

    /// Create a price from a whole number
    ///
    /// # Panics
    /// Panics if `value` is zero
    pub fn from_u64(value: u64) -> Self {
        assert!(value > 0, "Price must be strictly positive");
        Self(Decimal::from(value))
    }

    /// Parse a price from its decimal string form
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value = Decimal::from_str(s).map_err(|_| NumericError::Parse(s.to_string()))?;
        Self::try_from(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Whether this price is an exact multiple of `tick`
    pub fn is_multiple_of(&self, tick: Decimal) -> bool {
        tick > Decimal::ZERO && (self.0 % tick).is_zero()
    }
}

impl TryFrom<Decimal> for Price {
    type Error = NumericError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value).ok_or(NumericError::NonPositivePrice(value))
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative order or trade quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    /// Create a quantity, returning None if `value < 0`
    pub fn try_new(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            None
        } else {
            Some(Self(value.normalize()))
        }
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Parse a quantity from its decimal string form
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, NumericError> {
        let value = Decimal::from_str(s).map_err(|_| NumericError::Parse(s.to_string()))?;
        Self::try_from(value)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Subtract, returning None if the result would be negative
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        Self::try_new(self.0 - other.0)
    }

    /// Subtract, flooring at zero
    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        self.checked_sub(other).unwrap_or_else(Quantity::zero)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity((self.0 + rhs.0).normalize())
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = NumericError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value).ok_or(NumericError::NegativeQuantity(value))
    }
}

impl From<Quantity> for Decimal {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_rejects_zero_and_negative() {
        assert!(Price::try_new(Decimal::ZERO).is_none());
        assert!(Price::try_new(Decimal::from(-5)).is_none());
        assert!(Price::try_new(Decimal::from(5)).is_some());
    }

    #[test]
    fn test_price_normalization() {
        let a = Price::from_str("100.00").unwrap();
        let b = Price::from_u64(100);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "100");
    }

    #[test]
    fn test_price_ordering() {
        assert!(Price::from_str("0.49").unwrap() < Price::from_str("0.5").unwrap());
    }

    #[test]
    fn test_price_tick_multiple() {
        let tick = Decimal::from_str_exact("0.01").unwrap();
        assert!(Price::from_str("0.57").unwrap().is_multiple_of(tick));
        assert!(!Price::from_str("0.575").unwrap().is_multiple_of(tick));
    }

    #[test]
    fn test_price_deserialize_validates() {
        let ok: Price = serde_json::from_str("\"101.5\"").unwrap();
        assert_eq!(ok, Price::from_str("101.5").unwrap());

        let err = serde_json::from_str::<Price>("\"0\"");
        assert!(err.is_err());
    }

    #[test]
    fn test_quantity_arithmetic() {
        let a = Quantity::from_u64(10);
        let b = Quantity::from_str("4").unwrap();
        assert_eq!(a.checked_sub(b), Some(Quantity::from_u64(6)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(b.saturating_sub(a), Quantity::zero());
        assert_eq!(a + b, Quantity::from_u64(14));
    }

    #[test]
    fn test_quantity_rejects_negative() {
        assert!(Quantity::from_str("-1").is_err());
        assert!(Quantity::from_str("0").unwrap().is_zero());
        assert!(Quantity::from_str("abc").is_err());
    }

    #[test]
    fn test_quantity_deserialize_validates() {
        assert!(serde_json::from_str::<Quantity>("\"-0.5\"").is_err());
        let q: Quantity = serde_json::from_str("\"2.50\"").unwrap();
        assert_eq!(q.to_string(), "2.5");
    }
}
