//! Validated decimal types for prices and quantities
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! On-chain amounts arrive as integer strings scaled by the token's decimals
//! (usually 18) and are converted with [`from_fixed_point`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::NumericError;

/// Largest scale `Decimal` can carry.
pub const MAX_DECIMALS: u32 = 28;

/// Non-negative price (or any close-style value such as an exchange rate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
        ensure_non_negative(value).map(Self)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Price {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(parse_decimal(s)?)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = NumericError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value)
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

/// Non-negative amount (volume, staked amount, deposit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    pub fn try_new(value: Decimal) -> Result<Self, NumericError> {
        ensure_non_negative(value).map(Self)
    }

    /// Convert an on-chain integer amount with the given decimals.
    pub fn from_fixed_point(raw: &str, decimals: u32) -> Result<Self, NumericError> {
        from_fixed_point(raw, decimals).map(Self)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Quantity {
    type Err = NumericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(parse_decimal(s)?)
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = NumericError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::try_new(value)
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

/// Reject negative values.
pub fn ensure_non_negative(value: Decimal) -> Result<Decimal, NumericError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(NumericError::Negative(value.to_string()));
    }
    Ok(value)
}

/// Parse a decimal string (plain or scientific notation).
pub fn parse_decimal(s: &str) -> Result<Decimal, NumericError> {
    let trimmed = s.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| NumericError::NotANumber(trimmed.to_string()))
}

/// Convert an unsigned integer string scaled by `decimals` into a Decimal.
///
/// `from_fixed_point("1500000000000000000", 18)` is `1.5`. Fraction digits
/// beyond what `Decimal` can hold are rounded.
pub fn from_fixed_point(raw: &str, decimals: u32) -> Result<Decimal, NumericError> {
    if decimals > MAX_DECIMALS {
        return Err(NumericError::UnsupportedDecimals(decimals));
    }
    let digits = raw.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NumericError::NotANumber(digits.to_string()));
    }

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let scale = decimals as usize;
    let literal = if digits.len() > scale {
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.is_empty() {
            int_part.to_string()
        } else {
            format!("{}.{}", int_part, frac_part)
        }
    } else {
        let padding = "0".repeat(scale - digits.len());
        format!("0.{}{}", padding, digits.trim_end_matches('0'))
    };

    Decimal::from_str(&literal)
        .map(|d| d.normalize())
        .map_err(|_| NumericError::Overflow(raw.trim().to_string()))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whole-token wei amounts convert back to the token count.
        #[test]
        fn prop_fixed_point_whole_tokens(tokens in 0u64..10_000_000_000) {
            let raw = format!("{}{}", tokens, "0".repeat(18));
            prop_assert_eq!(from_fixed_point(&raw, 18).unwrap(), Decimal::from(tokens));
        }

        #[test]
        fn prop_fixed_point_never_negative(raw in "[0-9]{1,27}", decimals in 0u32..=18) {
            let value = from_fixed_point(&raw, decimals).unwrap();
            prop_assert!(!value.is_sign_negative() || value.is_zero());
        }
    }
}
