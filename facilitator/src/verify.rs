//! Verify-only inspection of payment authorizations.
//!
//! `POST /verify` never submits anything. It checks the authorization
//! against the matched requirement (network, recipient, exact amount,
//! validity window) and, when an executor is configured for the chain,
//! whether the ERC-3009 nonce was already consumed on-chain.

use apitoll_types::proto::{VerifyOutcome, VerifyRequest};
use apitoll_types::timestamp::UnixTimestamp;

use crate::transfer::ExecutorRegistry;

/// Runs all verify-only checks and renders the outcome.
pub async fn verify(
    request: &VerifyRequest,
    executors: &ExecutorRegistry,
    now: UnixTimestamp,
) -> VerifyOutcome {
    if let Err(reason) = check_static(request, now) {
        return VerifyOutcome::invalid(reason);
    }
    if let Some(executor) = executors.for_chain(request.requirements.network) {
        match executor
            .authorization_used(&request.payload.from, request.payload.nonce.0)
            .await
        {
            Ok(true) => {
                return VerifyOutcome::invalid("authorization nonce already used");
            }
            Ok(false) => {}
            Err(err) => {
                // Verify-only must not fail closed on RPC trouble; the
                // settlement path re-checks everything.
                tracing::warn!(error = %err, "nonce state check failed, skipping");
            }
        }
    }
    VerifyOutcome::valid()
}

/// Pure checks of authorization against requirement.
pub fn check_static(request: &VerifyRequest, now: UnixTimestamp) -> Result<(), &'static str> {
    let payload = &request.payload;
    let requirement = &request.requirements;
    if payload.network != requirement.network {
        return Err("authorization network does not match requirement");
    }
    if payload.to != requirement.pay_to {
        return Err("authorization recipient does not match requirement");
    }
    if payload.value != requirement.max_amount_required {
        return Err("authorization amount does not match requirement exactly");
    }
    if now < payload.valid_after {
        return Err("authorization not yet valid");
    }
    if now >= payload.valid_before {
        return Err("authorization expired");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_types::address::WalletAddress;
    use apitoll_types::chain::Chain;
    use apitoll_types::money::TokenAmount;
    use apitoll_types::proto::{
        EvmSignature, HexEncodedNonce, PaymentAuthorization, PaymentRequirement,
    };

    fn seller() -> WalletAddress {
        WalletAddress::parse("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").unwrap()
    }

    fn request(chain: Chain, value: u64) -> VerifyRequest {
        let requirement = PaymentRequirement::for_chains(
            &[Chain::Base],
            TokenAmount(5000),
            &seller(),
            "GET /api/joke",
            None,
        )
        .remove(0);
        VerifyRequest {
            payload: PaymentAuthorization {
                network: chain,
                from: WalletAddress::parse("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B")
                    .unwrap(),
                to: seller(),
                value: TokenAmount(value),
                valid_after: UnixTimestamp::from_secs(1_000),
                valid_before: UnixTimestamp::from_secs(2_000),
                nonce: HexEncodedNonce([7u8; 32]),
                signature: EvmSignature([3u8; 65]),
            },
            requirements: requirement,
        }
    }

    #[test]
    fn accepts_matching_authorization() {
        let now = UnixTimestamp::from_secs(1_500);
        assert!(check_static(&request(Chain::Base, 5000), now).is_ok());
    }

    #[test]
    fn rejects_network_mismatch() {
        let now = UnixTimestamp::from_secs(1_500);
        let err = check_static(&request(Chain::Solana, 5000), now).unwrap_err();
        assert!(err.contains("network"));
    }

    #[test]
    fn rejects_inexact_amount() {
        let now = UnixTimestamp::from_secs(1_500);
        assert!(check_static(&request(Chain::Base, 4999), now).is_err());
        assert!(check_static(&request(Chain::Base, 5001), now).is_err());
    }

    #[test]
    fn rejects_outside_validity_window() {
        assert_eq!(
            check_static(&request(Chain::Base, 5000), UnixTimestamp::from_secs(999)),
            Err("authorization not yet valid")
        );
        assert_eq!(
            check_static(&request(Chain::Base, 5000), UnixTimestamp::from_secs(2_000)),
            Err("authorization expired")
        );
    }

    #[tokio::test]
    async fn verify_without_executor_uses_static_checks_only() {
        let executors = ExecutorRegistry::default();
        let outcome = verify(
            &request(Chain::Base, 5000),
            &executors,
            UnixTimestamp::from_secs(1_500),
        )
        .await;
        assert!(outcome.is_accepted());
    }
}
