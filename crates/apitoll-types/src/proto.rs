//! Wire format of the 402 handshake.
//!
//! A paid endpoint answers an unpaid request with HTTP 402 and a
//! [`PaymentRequiredBody`]: one [`PaymentRequirement`] per chain it accepts,
//! mirrored base64-encoded in the `PAYMENT-REQUIRED` response header. The
//! buyer retries with a signed [`PaymentAuthorization`] in the `X-PAYMENT`
//! header; the facilitator verifies and settles it and the seller gate
//! attaches a [`Receipt`] to the fulfilled request.
//!
//! All structures serialize camelCase, amounts as smallest-unit strings.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;

use crate::address::WalletAddress;
use crate::chain::Chain;
use crate::fees::{FeeBreakdown, FeeConfig};
use crate::money::{MoneyAmount, TokenAmount};
use crate::timestamp::UnixTimestamp;
use crate::util::b64::{Base64Bytes, Base64JsonError};

/// Response header carrying the base64-encoded requirements list.
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";
/// Request header carrying the buyer's base64-encoded signed authorization.
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";
/// Header added by the facilitator when replaying the original request.
pub const X_PAYMENT_RECEIPT_HEADER: &str = "X-Payment-Receipt";

/// Payment schemes. Only `exact` is supported: the transferred amount must
/// match the requirement exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// A 65-byte ECDSA signature, serialized as a 0x-prefixed 130-character hex
/// string. Authorizes an ERC-3009 `transferWithAuthorization`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{130}$").expect("invalid signature regex"));

        if !SIG_REGEX.is_match(&s) {
            return Err(DeError::custom(
                "invalid EVM signature: must be 0x-prefixed, 130 hex chars",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| DeError::custom("invalid hex in EVM signature"))?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| DeError::custom("signature must be exactly 65 bytes"))?;
        Ok(EvmSignature(array))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A 32-byte authorization nonce, 0x-prefixed 64-character hex.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static NONCE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid nonce regex"));

        if !NONCE_REGEX.is_match(&s) {
            return Err(DeError::custom("invalid nonce format"));
        }
        let bytes = hex::decode(&s[2..]).map_err(|_| DeError::custom("invalid hex in nonce"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| DeError::custom("invalid nonce length"))?;
        Ok(HexEncodedNonce(array))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// Platform-fee disclosure inside a requirement's `extra` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFeeExtra {
    pub fee_bps: u16,
    pub platform_wallet: WalletAddress,
    pub seller_amount: TokenAmount,
    pub platform_amount: TokenAmount,
}

/// Scheme-specific extra data on a requirement: the asset's display name and
/// decimals, plus the fee split when a platform fee applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementExtra {
    pub name: String,
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_fee: Option<PlatformFeeExtra>,
}

/// Payment terms for one chain, as published in a 402 challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: Scheme,
    /// CAIP-2 network identifier.
    pub network: Chain,
    /// Price in smallest units, stringified.
    pub max_amount_required: TokenAmount,
    pub description: String,
    /// Seller wallet receiving the transfer.
    pub pay_to: WalletAddress,
    /// USDC token address on `network`.
    pub asset: String,
    pub extra: RequirementExtra,
}

impl PaymentRequirement {
    /// Builds the per-chain requirements for a priced endpoint.
    ///
    /// One requirement per entry in `chains`, all quoting the same smallest
    /// units price with the chain's USDC deployment as asset. The platform
    /// fee split is disclosed in `extra` when a fee config applies.
    pub fn for_chains(
        chains: &[Chain],
        price: TokenAmount,
        pay_to: &WalletAddress,
        description: &str,
        fee_config: Option<&FeeConfig>,
    ) -> Vec<PaymentRequirement> {
        let split = FeeBreakdown::split(price, fee_config);
        chains
            .iter()
            .map(|chain| {
                let usdc = chain.usdc();
                let platform_fee =
                    split
                        .platform_wallet
                        .as_ref()
                        .map(|wallet| PlatformFeeExtra {
                            fee_bps: split.fee_bps,
                            platform_wallet: wallet.clone(),
                            seller_amount: split.seller_amount,
                            platform_amount: split.platform_fee,
                        });
                PaymentRequirement {
                    scheme: Scheme::Exact,
                    network: *chain,
                    max_amount_required: price,
                    description: description.to_string(),
                    pay_to: pay_to.clone(),
                    asset: usdc.address.to_string(),
                    extra: RequirementExtra {
                        name: usdc.name.to_string(),
                        decimals: usdc.decimals,
                        platform_fee,
                    },
                }
            })
            .collect()
    }

    /// Encodes a requirements list for the `PAYMENT-REQUIRED` header.
    pub fn encode_header(
        requirements: &[PaymentRequirement],
    ) -> Result<Base64Bytes<'static>, Base64JsonError> {
        Base64Bytes::encode_json(&requirements)
    }

    /// Decodes a `PAYMENT-REQUIRED` header value.
    pub fn decode_header(header: &[u8]) -> Result<Vec<PaymentRequirement>, Base64JsonError> {
        Base64Bytes::from(header).decode_json()
    }
}

/// Wire form of the fee breakdown exposed in 402 bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdownWire {
    pub total_amount: TokenAmount,
    pub seller_amount: TokenAmount,
    pub platform_fee: TokenAmount,
    pub fee_bps: u16,
}

impl From<&FeeBreakdown> for FeeBreakdownWire {
    fn from(split: &FeeBreakdown) -> Self {
        FeeBreakdownWire {
            total_amount: split.total_amount,
            seller_amount: split.seller_amount,
            platform_fee: split.platform_fee,
            fee_bps: split.fee_bps,
        }
    }
}

/// JSON body of a 402 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub error: String,
    #[serde(default)]
    pub payment_requirements: Vec<PaymentRequirement>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_breakdown: Option<FeeBreakdownWire>,
}

impl PaymentRequiredBody {
    pub fn new(
        requirements: Vec<PaymentRequirement>,
        description: &str,
        fee_breakdown: Option<FeeBreakdownWire>,
    ) -> Self {
        PaymentRequiredBody {
            error: "Payment Required".to_string(),
            payment_requirements: requirements,
            description: description.to_string(),
            fee_breakdown,
        }
    }
}

/// The buyer's signed authorization, sent base64-encoded in `X-PAYMENT`.
///
/// Carries the full ERC-3009 tuple so the facilitator can reconstruct and
/// check the typed-data signature without any out-of-band state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    /// Must match the `network` of the requirement being satisfied.
    pub network: Chain,
    pub from: WalletAddress,
    pub to: WalletAddress,
    /// Exact amount in smallest units.
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
    pub signature: EvmSignature,
}

impl PaymentAuthorization {
    pub fn encode_header(&self) -> Result<Base64Bytes<'static>, Base64JsonError> {
        Base64Bytes::encode_json(self)
    }

    pub fn decode_header(header: &[u8]) -> Result<Self, Base64JsonError> {
        Base64Bytes::from(header).decode_json()
    }
}

/// Proof of settlement attached to the fulfilled request and to analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: String,
    pub chain: Chain,
    /// Human-readable amount (`"0.005"`), not smallest units.
    pub amount: MoneyAmount,
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub timestamp: UnixTimestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// Body POSTed to the facilitator's `/verify` endpoint by the seller gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payload: PaymentAuthorization,
    pub requirements: PaymentRequirement,
}

/// Facilitator's `/verify` answer.
///
/// Older facilitator builds answered `{success: …}` instead of `{valid: …}`;
/// [`VerifyOutcome::is_accepted`] accepts either flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyOutcome {
    pub fn valid() -> Self {
        VerifyOutcome {
            valid: Some(true),
            ..Default::default()
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        VerifyOutcome {
            valid: Some(false),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.valid == Some(true) || self.success == Some(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seller() -> WalletAddress {
        WalletAddress::parse("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").unwrap()
    }

    fn platform() -> WalletAddress {
        WalletAddress::parse("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045").unwrap()
    }

    #[test]
    fn builds_requirement_per_chain_with_fee_extra() {
        let config = FeeConfig {
            fee_bps: 300,
            platform_wallet: platform(),
        };
        let requirements = PaymentRequirement::for_chains(
            &[Chain::Base, Chain::Solana],
            TokenAmount(5000),
            &seller(),
            "GET /api/joke",
            Some(&config),
        );
        assert_eq!(requirements.len(), 2);

        let base = &requirements[0];
        assert_eq!(base.network, Chain::Base);
        assert_eq!(base.max_amount_required, TokenAmount(5000));
        assert_eq!(base.asset, "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
        let fee = base.extra.platform_fee.as_ref().unwrap();
        assert_eq!(fee.seller_amount, TokenAmount(4850));
        assert_eq!(fee.platform_amount, TokenAmount(150));
        assert_eq!(fee.fee_bps, 300);

        let solana = &requirements[1];
        assert_eq!(solana.asset, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
    }

    #[test]
    fn no_fee_config_omits_platform_extra() {
        let requirements = PaymentRequirement::for_chains(
            &[Chain::Base],
            TokenAmount(5000),
            &seller(),
            "GET /api/joke",
            None,
        );
        assert!(requirements[0].extra.platform_fee.is_none());
    }

    #[test]
    fn header_roundtrip_is_identity() {
        let config = FeeConfig {
            fee_bps: 250,
            platform_wallet: platform(),
        };
        let requirements = PaymentRequirement::for_chains(
            &[Chain::Base, Chain::BaseSepolia, Chain::Solana],
            TokenAmount(123_456),
            &seller(),
            "POST /api/translate",
            Some(&config),
        );
        let header = PaymentRequirement::encode_header(&requirements).unwrap();
        let decoded = PaymentRequirement::decode_header(header.as_ref()).unwrap();
        assert_eq!(decoded, requirements);
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let requirements = PaymentRequirement::for_chains(
            &[Chain::Base],
            TokenAmount(5000),
            &seller(),
            "GET /api/joke",
            None,
        );
        let json = serde_json::to_value(&requirements[0]).unwrap();
        assert_eq!(json["scheme"], "exact");
        assert_eq!(json["network"], "eip155:8453");
        assert_eq!(json["maxAmountRequired"], "5000");
        assert_eq!(json["payTo"], seller().as_str());
        assert_eq!(json["extra"]["decimals"], 6);
        assert_eq!(json["extra"]["name"], "USDC");
    }

    #[test]
    fn authorization_header_roundtrip() {
        let authorization = PaymentAuthorization {
            network: Chain::Base,
            from: WalletAddress::parse("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B").unwrap(),
            to: seller(),
            value: TokenAmount(5000),
            valid_after: UnixTimestamp::from_secs(1_800_000_000),
            valid_before: UnixTimestamp::from_secs(1_800_000_600),
            nonce: HexEncodedNonce([7u8; 32]),
            signature: EvmSignature([3u8; 65]),
        };
        let header = authorization.encode_header().unwrap();
        let decoded = PaymentAuthorization::decode_header(header.as_ref()).unwrap();
        assert_eq!(decoded.value, TokenAmount(5000));
        assert_eq!(decoded.nonce, authorization.nonce);
        assert_eq!(decoded.signature, authorization.signature);
    }

    #[test]
    fn verify_outcome_accepts_either_flag() {
        let modern: VerifyOutcome = serde_json::from_str(r#"{"valid": true}"#).unwrap();
        assert!(modern.is_accepted());
        let legacy: VerifyOutcome = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(legacy.is_accepted());
        let rejected: VerifyOutcome =
            serde_json::from_str(r#"{"valid": false, "error": "expired"}"#).unwrap();
        assert!(!rejected.is_accepted());
    }
}
