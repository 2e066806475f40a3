//! Supported settlement networks and their CAIP-2 identifiers.
//!
//! The platform advertises prices per chain; each chain carries a canonical
//! USDC deployment used as the payment asset. On the wire a chain is always
//! its CAIP-2 identifier (`eip155:8453`, `solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp`);
//! the short name (`base`, `solana`) appears in configuration and stored
//! documents.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// A settlement network the platform can charge on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
    Base,
    BaseSepolia,
    Solana,
}

/// USDC deployment details for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsdcDeployment {
    pub chain: Chain,
    /// Token contract (EVM) or mint (Solana) address.
    pub address: &'static str,
    pub decimals: u8,
    /// EIP-712 domain name for ERC-3009 authorizations; `USDC` everywhere.
    pub name: &'static str,
}

const USDC_BASE: UsdcDeployment = UsdcDeployment {
    chain: Chain::Base,
    address: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
    decimals: 6,
    name: "USDC",
};

const USDC_BASE_SEPOLIA: UsdcDeployment = UsdcDeployment {
    chain: Chain::BaseSepolia,
    address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
    decimals: 6,
    name: "USDC",
};

const USDC_SOLANA: UsdcDeployment = UsdcDeployment {
    chain: Chain::Solana,
    address: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
    decimals: 6,
    name: "USDC",
};

impl Chain {
    /// All chains the platform knows about.
    pub fn variants() -> &'static [Chain] {
        &[Chain::Base, Chain::BaseSepolia, Chain::Solana]
    }

    /// Short configuration name.
    pub fn name(&self) -> &'static str {
        match self {
            Chain::Base => "base",
            Chain::BaseSepolia => "base-sepolia",
            Chain::Solana => "solana",
        }
    }

    /// CAIP-2 chain identifier.
    pub fn caip2(&self) -> &'static str {
        match self {
            Chain::Base => "eip155:8453",
            Chain::BaseSepolia => "eip155:84532",
            Chain::Solana => "solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
        }
    }

    /// EVM chain id, if this is an eip155 chain.
    pub fn evm_chain_id(&self) -> Option<u64> {
        match self {
            Chain::Base => Some(8453),
            Chain::BaseSepolia => Some(84532),
            Chain::Solana => None,
        }
    }

    pub fn is_evm(&self) -> bool {
        self.evm_chain_id().is_some()
    }

    /// The canonical USDC deployment on this chain.
    pub fn usdc(&self) -> UsdcDeployment {
        match self {
            Chain::Base => USDC_BASE,
            Chain::BaseSepolia => USDC_BASE_SEPOLIA,
            Chain::Solana => USDC_SOLANA,
        }
    }
}

/// Error returned when a chain name or CAIP-2 id is not recognized.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown chain: {0}")]
pub struct ChainParseError(pub String);

impl FromStr for Chain {
    type Err = ChainParseError;

    /// Accepts both the short name and the CAIP-2 identifier.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for chain in Chain::variants() {
            if s == chain.name() || s == chain.caip2() {
                return Ok(*chain);
            }
        }
        Err(ChainParseError(s.to_string()))
    }
}

impl Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.caip2())
    }
}

impl Serialize for Chain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.caip2())
    }
}

impl<'de> Deserialize<'de> for Chain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<Chain>().map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caip2_roundtrip() {
        for chain in Chain::variants() {
            assert_eq!(chain.caip2().parse::<Chain>().unwrap(), *chain);
            assert_eq!(chain.name().parse::<Chain>().unwrap(), *chain);
        }
        assert!("eip155:1".parse::<Chain>().is_err());
    }

    #[test]
    fn base_usdc_deployment() {
        let usdc = Chain::Base.usdc();
        assert_eq!(usdc.address, "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
        assert_eq!(usdc.decimals, 6);
    }

    #[test]
    fn serializes_as_caip2() {
        let json = serde_json::to_string(&Chain::Base).unwrap();
        assert_eq!(json, "\"eip155:8453\"");
        let chain: Chain = serde_json::from_str("\"solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp\"")
            .unwrap();
        assert_eq!(chain, Chain::Solana);
    }
}
