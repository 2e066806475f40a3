//! Money amounts, human-readable and in smallest token units.
//!
//! Prices are configured as human-readable decimal strings (`"0.005"`), but
//! every on-chain and ledger computation happens on [`TokenAmount`]: an exact
//! integer count of the token's smallest unit (micro-dollars for USDC).
//! Conversion between the two is lossless or rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Errors that can occur when parsing or converting a monetary amount.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyAmountParseError {
    #[error("invalid number format")]
    InvalidFormat,
    #[error("amount out of range")]
    OutOfRange,
    #[error("negative value is not allowed")]
    Negative,
    #[error("amount has {money} decimal places but the token supports {token}")]
    WrongPrecision { money: u32, token: u32 },
}

mod bounds {
    use super::*;
    use std::sync::LazyLock;

    pub static MAX: LazyLock<Decimal> =
        LazyLock::new(|| Decimal::from_str("999999999").expect("valid decimal"));
}

/// A non-negative decimal amount parsed from a human-readable string.
///
/// Currency symbols, thousand separators and whitespace are stripped before
/// parsing. The original precision is preserved so conversion to a token
/// amount can verify the input does not exceed the token's decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MoneyAmount(Decimal);

impl MoneyAmount {
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        static CLEANER: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"[^\d\.\-]+").expect("valid cleaner regex"));
        let cleaned = CLEANER.replace_all(input, "").to_string();
        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;
        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        if parsed > *bounds::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(parsed))
    }

    /// Number of decimal places in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Converts to an exact smallest-unit amount for a token with `decimals`
    /// decimal places. Fails if the input carries more precision than the
    /// token supports or overflows `u64`.
    pub fn as_token_amount(&self, decimals: u32) -> Result<TokenAmount, MoneyAmountParseError> {
        if self.scale() > decimals {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: self.scale(),
                token: decimals,
            });
        }
        let scaled = self
            .0
            .checked_mul(Decimal::from(10u64.pow(decimals)))
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let units = scaled.to_u64().ok_or(MoneyAmountParseError::OutOfRange)?;
        Ok(TokenAmount(units))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Serialize for MoneyAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MoneyAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MoneyAmount::parse(&s).map_err(DeError::custom)
    }
}

/// An exact amount in the token's smallest unit (USDC: micro-dollars).
///
/// Serialized as a stringified integer to survive JSON consumers whose
/// number type cannot represent 64-bit integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub u64);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_add(rhs.0).map(TokenAmount)
    }

    pub fn saturating_add(self, rhs: TokenAmount) -> TokenAmount {
        TokenAmount(self.0.saturating_add(rhs.0))
    }

    /// Renders the amount as a human-readable decimal for a token with
    /// `decimals` decimal places: `TokenAmount(5000)` at 6 decimals is `0.005`.
    pub fn to_money(&self, decimals: u32) -> MoneyAmount {
        let mut decimal = Decimal::from(self.0);
        decimal.set_scale(decimals).expect("scale within bounds");
        MoneyAmount(decimal)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(value)
    }
}

impl Add for TokenAmount {
    type Output = TokenAmount;

    fn add(self, rhs: TokenAmount) -> TokenAmount {
        TokenAmount(self.0 + rhs.0)
    }
}

impl Sub for TokenAmount {
    type Output = TokenAmount;

    fn sub(self, rhs: TokenAmount) -> TokenAmount {
        TokenAmount(self.0 - rhs.0)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let units = s
            .parse::<u64>()
            .map_err(|_| DeError::custom("token amount must be a non-negative integer string"))?;
        Ok(TokenAmount(units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_symbolic_amounts() {
        assert_eq!(MoneyAmount::parse("0.005").unwrap().to_string(), "0.005");
        assert_eq!(MoneyAmount::parse("$10.50").unwrap().to_string(), "10.5");
        assert_eq!(MoneyAmount::parse("1,000").unwrap().to_string(), "1000");
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert_eq!(
            MoneyAmount::parse("-1"),
            Err(MoneyAmountParseError::Negative)
        );
        assert_eq!(
            MoneyAmount::parse("abc"),
            Err(MoneyAmountParseError::InvalidFormat)
        );
    }

    #[test]
    fn token_amount_conversion_is_exact() {
        let amount = MoneyAmount::parse("0.005").unwrap();
        assert_eq!(amount.as_token_amount(6).unwrap(), TokenAmount(5000));

        let amount = MoneyAmount::parse("1").unwrap();
        assert_eq!(amount.as_token_amount(6).unwrap(), TokenAmount(1_000_000));
    }

    #[test]
    fn conversion_rejects_excess_precision() {
        let amount = MoneyAmount::parse("0.0000001").unwrap();
        assert_eq!(
            amount.as_token_amount(6),
            Err(MoneyAmountParseError::WrongPrecision { money: 7, token: 6 })
        );
    }

    #[test]
    fn token_amount_to_money_roundtrip() {
        let money = TokenAmount(5000).to_money(6);
        assert_eq!(money.to_string(), "0.005");
        assert_eq!(money.as_token_amount(6).unwrap(), TokenAmount(5000));
    }

    #[test]
    fn token_amount_serializes_as_string() {
        let json = serde_json::to_string(&TokenAmount(5000)).unwrap();
        assert_eq!(json, "\"5000\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TokenAmount(5000));
    }
}
