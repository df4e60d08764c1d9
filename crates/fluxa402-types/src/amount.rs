//! 256-bit token amounts serialized as decimal strings.
//!
//! Every monetary amount and nonce on the x402 v2 wire is a decimal string of
//! a non-negative integer in the asset's smallest unit. Amounts are 256-bit
//! to cover EVM token ranges; arithmetic never round-trips through floats.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// A 256-bit unsigned amount, serialized as a decimal string.
///
/// Deserialization is strict: signs, non-digit characters, empty strings,
/// and leading zeros other than a bare `"0"` are rejected.
///
/// # Example
///
/// ```
/// use fluxa402_types::amount::TokenAmount;
///
/// let amount: TokenAmount = serde_json::from_str("\"15000\"").unwrap();
/// assert_eq!(serde_json::to_string(&amount).unwrap(), "\"15000\"");
/// assert!(serde_json::from_str::<TokenAmount>("\"015000\"").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(U256::ZERO);

    pub fn inner(&self) -> U256 {
        self.0
    }

    pub fn checked_add(&self, rhs: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_add(rhs.0).map(TokenAmount)
    }

    pub fn saturating_add(&self, rhs: TokenAmount) -> TokenAmount {
        TokenAmount(self.0.saturating_add(rhs.0))
    }
}

/// Errors from parsing a wire decimal string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AmountParseError {
    #[error("amount must not be empty")]
    Empty,
    #[error("amount must contain only decimal digits")]
    InvalidDigit,
    #[error("amount must not have leading zeros")]
    LeadingZero,
    #[error("amount exceeds 256 bits")]
    Overflow,
}

/// Parses a strict wire decimal into a [`U256`].
///
/// Shared by [`TokenAmount`] and the raw `U256` serde helpers in
/// [`u256_str`]; enforces the wire grammar: digits only, no signs,
/// no leading zeros other than `"0"`.
pub fn parse_decimal(s: &str) -> Result<U256, AmountParseError> {
    if s.is_empty() {
        return Err(AmountParseError::Empty);
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountParseError::InvalidDigit);
    }
    if s.len() > 1 && s.starts_with('0') {
        return Err(AmountParseError::LeadingZero);
    }
    U256::from_str_radix(s, 10).map_err(|_| AmountParseError::Overflow)
}

impl FromStr for TokenAmount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_decimal(s).map(TokenAmount)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for raw [`U256`] fields carried as wire decimals.
///
/// ```
/// use alloy_primitives::U256;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Receipt {
///     #[serde(with = "fluxa402_types::amount::u256_str")]
///     nonce: U256,
/// }
/// ```
pub mod u256_str {
    use super::parse_decimal;
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_decimal(&s).map_err(serde::de::Error::custom)
    }
}
