//! Wallet address validation for the chains the platform settles on.
//!
//! Agents and sellers are identified by on-chain wallet addresses. The
//! accepted formats are strict: an EVM address is `0x` plus 40 hex characters
//! and must not be the zero address; a Solana address is base58, 32 bytes
//! decoded, 32–44 characters in text form. Anything else is rejected at the
//! edge, before a document is written or a transfer is attempted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

use crate::chain::Chain;

static EVM_ADDRESS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("invalid EVM address regex"));

const EVM_ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Errors produced while validating a wallet address.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid EVM address format: expected 0x followed by 40 hex characters")]
    InvalidEvmFormat,
    #[error("EVM zero address is not a valid payment destination")]
    ZeroAddress,
    #[error("invalid Solana address: expected base58, 32-44 characters")]
    InvalidSolanaFormat,
    #[error("address does not match chain {0}")]
    ChainMismatch(Chain),
}

/// A validated EVM address: `0x` + 40 hex characters, never the zero address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvmAddress(String);

impl EvmAddress {
    /// Parses and validates an EVM address string.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if !EVM_ADDRESS_REGEX.is_match(input) {
            return Err(AddressError::InvalidEvmFormat);
        }
        if input.eq_ignore_ascii_case(EVM_ZERO_ADDRESS) {
            return Err(AddressError::ZeroAddress);
        }
        Ok(EvmAddress(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EvmAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EvmAddress::parse(s)
    }
}

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&EvmAddress> for alloy_primitives::Address {
    type Error = alloy_primitives::hex::FromHexError;

    fn try_from(value: &EvmAddress) -> Result<Self, Self::Error> {
        value.0.parse::<alloy_primitives::Address>()
    }
}

/// A validated Solana address: base58 text, 32–44 characters, 32 bytes decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SolanaAddress(String);

impl SolanaAddress {
    /// Parses and validates a Solana address string.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if input.len() < 32 || input.len() > 44 {
            return Err(AddressError::InvalidSolanaFormat);
        }
        let decoded = bs58::decode(input)
            .into_vec()
            .map_err(|_| AddressError::InvalidSolanaFormat)?;
        if decoded.len() != 32 {
            return Err(AddressError::InvalidSolanaFormat);
        }
        Ok(SolanaAddress(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SolanaAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SolanaAddress::parse(s)
    }
}

impl Display for SolanaAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wallet address on any supported chain.
///
/// Parsing tries the EVM format first, then Solana. Use
/// [`WalletAddress::parse_for_chain`] when the expected chain is known, so a
/// well-formed address on the wrong chain is rejected instead of accepted
/// under the other format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WalletAddress {
    Evm(EvmAddress),
    Solana(SolanaAddress),
}

impl WalletAddress {
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if input.starts_with("0x") {
            return EvmAddress::parse(input).map(WalletAddress::Evm);
        }
        SolanaAddress::parse(input).map(WalletAddress::Solana)
    }

    /// Parses an address and checks it belongs to the address family of `chain`.
    pub fn parse_for_chain(input: &str, chain: Chain) -> Result<Self, AddressError> {
        let address = Self::parse(input)?;
        match (&address, chain.is_evm()) {
            (WalletAddress::Evm(_), true) | (WalletAddress::Solana(_), false) => Ok(address),
            _ => Err(AddressError::ChainMismatch(chain)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WalletAddress::Evm(a) => a.as_str(),
            WalletAddress::Solana(a) => a.as_str(),
        }
    }

    pub fn as_evm(&self) -> Option<&EvmAddress> {
        match self {
            WalletAddress::Evm(a) => Some(a),
            WalletAddress::Solana(_) => None,
        }
    }
}

impl FromStr for WalletAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WalletAddress::parse(s)
    }
}

impl Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        WalletAddress::parse(&s).map_err(DeError::custom)
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EvmAddress::parse(&s).map_err(DeError::custom)
    }
}

impl Serialize for SolanaAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SolanaAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SolanaAddress::parse(&s).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_wellformed_evm_address() {
        let address = EvmAddress::parse("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap();
        assert_eq!(
            address.as_str(),
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"
        );
    }

    #[test]
    fn rejects_malformed_evm_addresses() {
        assert_eq!(
            EvmAddress::parse("0x1234"),
            Err(AddressError::InvalidEvmFormat)
        );
        assert_eq!(
            EvmAddress::parse("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            Err(AddressError::InvalidEvmFormat)
        );
        assert_eq!(
            EvmAddress::parse("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA0291g"),
            Err(AddressError::InvalidEvmFormat)
        );
    }

    #[test]
    fn rejects_zero_address() {
        assert_eq!(
            EvmAddress::parse("0x0000000000000000000000000000000000000000"),
            Err(AddressError::ZeroAddress)
        );
    }

    #[test]
    fn accepts_wellformed_solana_address() {
        let address =
            SolanaAddress::parse("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap();
        assert_eq!(address.as_str().len(), 44);
    }

    #[test]
    fn rejects_malformed_solana_addresses() {
        // Too short
        assert!(SolanaAddress::parse("abc").is_err());
        // Not base58 (contains 0, O, I, l)
        assert!(SolanaAddress::parse("0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl").is_err());
        // 45 characters
        assert!(
            SolanaAddress::parse("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1vX").is_err()
        );
    }

    #[test]
    fn parse_for_chain_rejects_family_mismatch() {
        let err = WalletAddress::parse_for_chain(
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            Chain::Base,
        )
        .unwrap_err();
        assert_eq!(err, AddressError::ChainMismatch(Chain::Base));

        assert!(
            WalletAddress::parse_for_chain(
                "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                Chain::Solana
            )
            .is_err()
        );
    }
}
