//! The agent wallet: policy-gated, facilitator-driven paid calls.

use http::Method;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use apitoll_types::address::WalletAddress;
use apitoll_types::facilitator::{PayRequest, PaymentStatus};
use apitoll_types::money::TokenAmount;
use apitoll_types::policy::{
    ActivePolicy, DenyReason, PolicyDecision, ProposedPayment, SpendSnapshot, evaluate,
};
use apitoll_types::proto::{PaymentRequiredBody, PaymentRequirement};
use apitoll_types::timestamp::UnixTimestamp;

use crate::client::{FacilitatorApi, FacilitatorApiError};
use crate::ledger::SpendLedger;
use crate::signing::{AuthorizationSigner, SigningError};

const POLL_INTERVAL: Duration = Duration::from_millis(750);
const POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors raised to the caller of a paid request.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("payment denied by policy: {reason}")]
    PolicyDenied { reason: DenyReason },
    #[error("payment failed: {reason}")]
    PaymentFailed { reason: String },
    #[error("request cancelled; payment {payment_id} left for reconciliation")]
    Cancelled { payment_id: String },
    #[error("payment did not reach a terminal state within {0:?}")]
    PollTimeout(Duration),
    #[error("origin returned 402 without a signable payment requirement")]
    NoSignableRequirement,
    #[error("could not parse 402 challenge: {0}")]
    MalformedChallenge(String),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Facilitator(#[from] FacilitatorApiError),
    #[error("origin request failed: {0}")]
    Origin(#[from] reqwest::Error),
}

/// The original request the wallet issues and, if challenged, pays for.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl OutboundRequest {
    pub fn get(url: Url) -> Self {
        OutboundRequest {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: None,
        }
    }
}

/// The outcome of a paid call.
pub struct PaidResponse {
    /// The origin's response, relayed through the facilitator (or direct
    /// when no payment was required).
    pub response: reqwest::Response,
    /// Set when a payment was made.
    pub payment_id: Option<String>,
}

/// A buyer wallet bound to one agent: signer, policies and spend ledger.
pub struct AgentWallet {
    http: Client,
    signer: AuthorizationSigner,
    facilitator: FacilitatorApi,
    policies: Vec<ActivePolicy>,
    ledger: Arc<dyn SpendLedger>,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl AgentWallet {
    pub fn new(
        signer: AuthorizationSigner,
        facilitator: FacilitatorApi,
        policies: Vec<ActivePolicy>,
        ledger: Arc<dyn SpendLedger>,
    ) -> Self {
        AgentWallet {
            http: Client::new(),
            signer,
            facilitator,
            policies,
            ledger,
            poll_interval: POLL_INTERVAL,
            poll_timeout: POLL_TIMEOUT,
        }
    }

    pub fn wallet_address(&self) -> WalletAddress {
        self.signer.wallet()
    }

    /// Issues `request`; on a 402 challenge, pays and replays it through the
    /// facilitator. Cancelling via `cancel` stops polling but not an
    /// already-submitted transfer; the payment id is recorded as orphaned.
    pub async fn execute(
        &self,
        request: OutboundRequest,
        cancel: CancellationToken,
    ) -> Result<PaidResponse, WalletError> {
        let bare = self.send_original(&request).await?;
        if bare.status() != reqwest::StatusCode::PAYMENT_REQUIRED {
            return Ok(PaidResponse {
                response: bare,
                payment_id: None,
            });
        }

        let challenge: PaymentRequiredBody = bare
            .json()
            .await
            .map_err(|e| WalletError::MalformedChallenge(e.to_string()))?;
        let requirement = select_requirement(&challenge.payment_requirements)
            .ok_or(WalletError::NoSignableRequirement)?;

        // Policy gate: a deny aborts with no facilitator I/O at all.
        let snapshot = self.ledger.snapshot().await;
        if let PolicyDecision::Deny(reason) =
            check_policies(&self.policies, &requirement, &snapshot)
        {
            return Err(WalletError::PolicyDenied { reason });
        }
        self.ledger.record_attempt().await;

        let authorization = self
            .signer
            .sign(&requirement, UnixTimestamp::now())
            .await?;
        let idempotency_key = derive_idempotency_key(
            &self.signer.wallet(),
            request.url.as_str(),
            request.method.as_str(),
            request.body.as_deref(),
            requirement.max_amount_required,
        );

        let accepted = self
            .facilitator
            .pay(&PayRequest {
                original_url: request.url.to_string(),
                original_method: request.method.to_string(),
                original_headers: request.headers.clone(),
                original_body: request.body.clone(),
                payment_required: requirement.clone(),
                agent_wallet: self.signer.wallet(),
                agent_auth: authorization,
                payment_id: None,
                idempotency_key: Some(idempotency_key),
            })
            .await?;
        let payment_id = accepted.payment_id;
        tracing::debug!(payment_id = %payment_id, "payment submitted");

        self.await_terminal(&payment_id, requirement.max_amount_required, &cancel)
            .await?;

        let response = self.facilitator.forward(&payment_id).await?;
        Ok(PaidResponse {
            response,
            payment_id: Some(payment_id),
        })
    }

    async fn send_original(
        &self,
        request: &OutboundRequest,
    ) -> Result<reqwest::Response, WalletError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder.send().await?)
    }

    async fn await_terminal(
        &self,
        payment_id: &str,
        amount: TokenAmount,
        cancel: &CancellationToken,
    ) -> Result<(), WalletError> {
        let deadline = tokio::time::Instant::now() + self.poll_timeout;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(WalletError::PollTimeout(self.poll_timeout));
            }
            let view = tokio::select! {
                _ = cancel.cancelled() => {
                    // The transfer may still settle; leave a marker for
                    // reconciliation instead of pretending it never happened.
                    self.ledger.record_orphaned(payment_id).await;
                    return Err(WalletError::Cancelled {
                        payment_id: payment_id.to_string(),
                    });
                }
                view = self.facilitator.status(payment_id) => view?,
            };
            match view.status {
                PaymentStatus::Completed => {
                    self.ledger.record_settled(amount).await;
                    return Ok(());
                }
                PaymentStatus::Failed => {
                    return Err(WalletError::PaymentFailed {
                        reason: view.error.unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                PaymentStatus::Pending | PaymentStatus::Processing => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

/// Picks the first requirement the wallet can sign for (EVM chains).
fn select_requirement(requirements: &[PaymentRequirement]) -> Option<PaymentRequirement> {
    requirements
        .iter()
        .find(|r| r.network.is_evm())
        .cloned()
}

/// Runs kernel policy evaluation against one requirement.
fn check_policies(
    policies: &[ActivePolicy],
    requirement: &PaymentRequirement,
    snapshot: &SpendSnapshot,
) -> PolicyDecision {
    let proposed = ProposedPayment {
        seller: requirement.pay_to.clone(),
        amount: requirement.max_amount_required,
        chain: requirement.network,
        endpoint: Some(requirement.description.clone()),
    };
    evaluate(policies, &proposed, snapshot)
}

/// Deterministic idempotency key over the payment-identity tuple, so a safe
/// retry of the same call can never double-pay.
pub fn derive_idempotency_key(
    agent: &WalletAddress,
    url: &str,
    method: &str,
    body: Option<&str>,
    amount: TokenAmount,
) -> String {
    let body_hash = {
        let mut hasher = Sha256::new();
        hasher.update(body.unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    };
    let mut hasher = Sha256::new();
    hasher.update(agent.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(method.as_bytes());
    hasher.update(b"|");
    hasher.update(body_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(amount.to_string().as_bytes());
    format!("idk_{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_types::chain::Chain;
    use apitoll_types::policy::{PolicyRule, PolicyScope};

    fn agent() -> WalletAddress {
        WalletAddress::parse("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B").unwrap()
    }

    fn seller() -> WalletAddress {
        WalletAddress::parse("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").unwrap()
    }

    fn requirement(amount: u64, chain: Chain) -> PaymentRequirement {
        PaymentRequirement::for_chains(&[chain], TokenAmount(amount), &seller(), "joke", None)
            .remove(0)
    }

    #[test]
    fn idempotency_key_is_deterministic() {
        let a = derive_idempotency_key(
            &agent(),
            "https://api.example/joke",
            "GET",
            None,
            TokenAmount(5000),
        );
        let b = derive_idempotency_key(
            &agent(),
            "https://api.example/joke",
            "GET",
            None,
            TokenAmount(5000),
        );
        assert_eq!(a, b);
        assert!(a.starts_with("idk_"));
    }

    #[test]
    fn idempotency_key_varies_with_every_tuple_element() {
        let base = derive_idempotency_key(
            &agent(),
            "https://api.example/joke",
            "GET",
            Some("{}"),
            TokenAmount(5000),
        );
        let other_agent = derive_idempotency_key(
            &seller(),
            "https://api.example/joke",
            "GET",
            Some("{}"),
            TokenAmount(5000),
        );
        let other_url = derive_idempotency_key(
            &agent(),
            "https://api.example/poem",
            "GET",
            Some("{}"),
            TokenAmount(5000),
        );
        let other_method = derive_idempotency_key(
            &agent(),
            "https://api.example/joke",
            "POST",
            Some("{}"),
            TokenAmount(5000),
        );
        let other_body = derive_idempotency_key(
            &agent(),
            "https://api.example/joke",
            "GET",
            Some("{\"a\":1}"),
            TokenAmount(5000),
        );
        let other_amount = derive_idempotency_key(
            &agent(),
            "https://api.example/joke",
            "GET",
            Some("{}"),
            TokenAmount(5001),
        );
        let keys = [&base, &other_agent, &other_url, &other_method, &other_body, &other_amount];
        for (i, left) in keys.iter().enumerate() {
            for right in keys.iter().skip(i + 1) {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn budget_deny_happens_before_any_network_io() {
        // Settled 0.008 today against a 0.01 daily cap; a 0.005 attempt
        // must deny. `check_policies` runs before the facilitator client is
        // ever touched in `execute`.
        let policies = vec![ActivePolicy {
            scope: PolicyScope::Agent,
            rule: PolicyRule::Budget {
                daily_limit: Some(TokenAmount(10_000)),
                monthly_limit: None,
                per_transaction_limit: Some(TokenAmount(10_000)),
            },
        }];
        let snapshot = SpendSnapshot {
            settled_today: TokenAmount(8000),
            ..Default::default()
        };
        let decision = check_policies(&policies, &requirement(5000, Chain::Base), &snapshot);
        assert_eq!(
            decision,
            PolicyDecision::Deny(DenyReason::BudgetExceeded)
        );
    }

    #[test]
    fn selects_first_signable_requirement() {
        let requirements = vec![
            requirement(5000, Chain::Solana),
            requirement(5000, Chain::Base),
            requirement(5000, Chain::BaseSepolia),
        ];
        let selected = select_requirement(&requirements).unwrap();
        assert_eq!(selected.network, Chain::Base);
        assert!(select_requirement(&[requirement(1, Chain::Solana)]).is_none());
    }
}
