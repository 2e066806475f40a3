//! ERC-3009 authorization signing.
//!
//! The wallet signs an EIP-712 `TransferWithAuthorization` for the exact
//! amount a requirement quotes, valid from ten minutes in the past (clock
//! skew) until the endpoint's timeout. The nonce is random per signature;
//! the token contract consumes it on settlement, so a replayed
//! authorization is rejected on-chain.

use alloy_primitives::{Address, FixedBytes, U256};
use alloy_signer::Signer;
use alloy_sol_types::{SolStruct, eip712_domain, sol};
use rand::Rng;
use std::sync::Arc;

use apitoll_types::address::{EvmAddress, WalletAddress};
use apitoll_types::chain::Chain;
use apitoll_types::proto::{EvmSignature, HexEncodedNonce, PaymentAuthorization, PaymentRequirement};
use apitoll_types::timestamp::UnixTimestamp;

/// Authorizations are valid starting this many seconds in the past.
const VALID_AFTER_SKEW_SECS: u64 = 10 * 60;
/// Default validity window ahead of now.
const VALID_BEFORE_SECS: u64 = 300;
/// EIP-712 domain version used by USDC deployments.
const USDC_DOMAIN_VERSION: &str = "2";

sol! {
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("cannot sign for non-EVM chain {0}")]
    UnsupportedChain(Chain),
    #[error("requirement carries an invalid asset address")]
    InvalidAsset,
    #[error("requirement pay_to is not an EVM address")]
    InvalidPayTo,
    #[error("failed to sign authorization")]
    Signer(#[source] alloy_signer::Error),
}

/// Wraps an EIP-712-capable signer and produces payment authorizations.
#[derive(Clone)]
pub struct AuthorizationSigner {
    signer: Arc<dyn Signer + Send + Sync>,
}

impl AuthorizationSigner {
    pub fn new<S: Signer + Send + Sync + 'static>(signer: S) -> Self {
        AuthorizationSigner {
            signer: Arc::new(signer),
        }
    }

    /// The signing wallet's address.
    pub fn wallet(&self) -> WalletAddress {
        let address = self.signer.address().to_string();
        WalletAddress::Evm(EvmAddress::parse(&address).expect("signer address is well-formed"))
    }

    /// Signs an authorization for the exact amount in `requirement`.
    pub async fn sign(
        &self,
        requirement: &PaymentRequirement,
        now: UnixTimestamp,
    ) -> Result<PaymentAuthorization, SigningError> {
        let chain_id = requirement
            .network
            .evm_chain_id()
            .ok_or(SigningError::UnsupportedChain(requirement.network))?;
        let verifying_contract = requirement
            .asset
            .parse::<Address>()
            .map_err(|_| SigningError::InvalidAsset)?;
        let pay_to = requirement
            .pay_to
            .as_evm()
            .ok_or(SigningError::InvalidPayTo)?;
        let to_address = Address::try_from(pay_to).map_err(|_| SigningError::InvalidPayTo)?;

        let domain = eip712_domain! {
            name: requirement.extra.name.clone(),
            version: USDC_DOMAIN_VERSION.to_string(),
            chain_id: chain_id,
            verifying_contract: verifying_contract,
        };

        let valid_after = now.as_secs().saturating_sub(VALID_AFTER_SKEW_SECS);
        let valid_before = now.as_secs() + VALID_BEFORE_SECS;
        let nonce: [u8; 32] = rand::rng().random();

        let message = TransferWithAuthorization {
            from: self.signer.address(),
            to: to_address,
            value: U256::from(requirement.max_amount_required.as_u64()),
            validAfter: U256::from(valid_after),
            validBefore: U256::from(valid_before),
            nonce: FixedBytes(nonce),
        };
        let hash = message.eip712_signing_hash(&domain);
        let signature = self
            .signer
            .sign_hash(&hash)
            .await
            .map_err(SigningError::Signer)?;

        Ok(PaymentAuthorization {
            network: requirement.network,
            from: self.wallet(),
            to: requirement.pay_to.clone(),
            value: requirement.max_amount_required,
            valid_after: UnixTimestamp::from_secs(valid_after),
            valid_before: UnixTimestamp::from_secs(valid_before),
            nonce: HexEncodedNonce(nonce),
            signature: EvmSignature(signature.as_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer_local::PrivateKeySigner;
    use apitoll_types::money::TokenAmount;

    fn requirement(chain: Chain) -> PaymentRequirement {
        PaymentRequirement::for_chains(
            &[chain],
            TokenAmount(5000),
            &WalletAddress::parse("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").unwrap(),
            "GET /api/joke",
            None,
        )
        .remove(0)
    }

    #[tokio::test]
    async fn signs_exact_amount_with_validity_window() {
        let signer = AuthorizationSigner::new(PrivateKeySigner::random());
        let now = UnixTimestamp::from_secs(1_800_000_000);
        let authorization = signer.sign(&requirement(Chain::Base), now).await.unwrap();

        assert_eq!(authorization.value, TokenAmount(5000));
        assert_eq!(authorization.network, Chain::Base);
        assert_eq!(
            authorization.valid_after.as_secs(),
            1_800_000_000 - VALID_AFTER_SKEW_SECS
        );
        assert_eq!(
            authorization.valid_before.as_secs(),
            1_800_000_000 + VALID_BEFORE_SECS
        );
        assert_eq!(authorization.from, signer.wallet());
    }

    #[tokio::test]
    async fn refuses_non_evm_chains() {
        let signer = AuthorizationSigner::new(PrivateKeySigner::random());
        let err = signer
            .sign(&requirement(Chain::Solana), UnixTimestamp::from_secs(1_800_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::UnsupportedChain(Chain::Solana)));
    }

    #[tokio::test]
    async fn nonces_are_unique_per_signature() {
        let signer = AuthorizationSigner::new(PrivateKeySigner::random());
        let now = UnixTimestamp::from_secs(1_800_000_000);
        let first = signer.sign(&requirement(Chain::Base), now).await.unwrap();
        let second = signer.sign(&requirement(Chain::Base), now).await.unwrap();
        assert_ne!(first.nonce, second.nonce);
    }
}
