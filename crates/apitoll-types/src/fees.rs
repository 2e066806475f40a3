//! Platform fee split.
//!
//! Every paid call is split between the seller and the platform at the
//! configured basis points. The split is computed in smallest token units
//! with rounding toward zero on the platform side; the seller absorbs the
//! rounding remainder, so the parts always sum back to the total exactly.

use serde::{Deserialize, Serialize};

use crate::address::WalletAddress;
use crate::money::TokenAmount;

/// Fee configuration attached to an endpoint or organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeConfig {
    /// Basis points taken by the platform. 300 = 3%.
    pub fee_bps: u16,
    /// Wallet receiving the platform share.
    pub platform_wallet: WalletAddress,
}

/// The exact split of one payment, in smallest token units.
///
/// Invariant: `platform_fee + seller_amount == total_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub total_amount: TokenAmount,
    pub seller_amount: TokenAmount,
    pub platform_fee: TokenAmount,
    pub fee_bps: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_wallet: Option<WalletAddress>,
}

impl FeeBreakdown {
    /// Splits `price` according to `config`.
    ///
    /// With no config, or `fee_bps == 0`, the platform takes nothing and no
    /// platform wallet is materialized. The platform share is
    /// `price * fee_bps / 10_000` rounded toward zero at the smallest unit.
    pub fn split(price: TokenAmount, config: Option<&FeeConfig>) -> FeeBreakdown {
        match config {
            Some(config) if config.fee_bps > 0 => {
                // u64 * u16 cannot overflow u128; floor division rounds toward zero.
                let fee =
                    (u128::from(price.as_u64()) * u128::from(config.fee_bps) / 10_000) as u64;
                let platform_fee = TokenAmount(fee);
                FeeBreakdown {
                    total_amount: price,
                    seller_amount: price - platform_fee,
                    platform_fee,
                    fee_bps: config.fee_bps,
                    platform_wallet: Some(config.platform_wallet.clone()),
                }
            }
            _ => FeeBreakdown {
                total_amount: price,
                seller_amount: price,
                platform_fee: TokenAmount::ZERO,
                fee_bps: 0,
                platform_wallet: None,
            },
        }
    }
}
