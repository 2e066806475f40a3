//! Deposit on-ramp surface.
//!
//! Deposits are persisted here and flipped to
//! `processing` by Stripe reconciliation; the actual USDC top-up runs as an
//! internal action outside the core.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use apitoll_store::document::{IndexKey, Order};
use apitoll_store::tables::{Deposit, DepositStatus};
use apitoll_types::address::WalletAddress;
use apitoll_types::chain::Chain;
use apitoll_types::money::MoneyAmount;
use apitoll_types::timestamp::now_millis;

use crate::error::ApiError;
use crate::http::{data, gate_org};
use crate::state::AppState;

/// `GET /v1/deposits`: the org's deposits, newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let deposits: Vec<serde_json::Value> = state.store.read(|inner| {
        inner
            .deposits
            .by_index("by_org", IndexKey::single(org_id.to_string()))
            .order(Order::Desc)
            .take(100)
            .collect()
            .iter()
            .map(|(id, deposit)| {
                json!({
                    "id": id.to_string(),
                    "amountUsd": deposit.amount_usd,
                    "status": deposit.status,
                    "chain": deposit.chain,
                    "destination": deposit.destination,
                    "createdAt": deposit.created_at,
                })
            })
            .collect()
    });
    Ok(data(deposits))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDepositBody {
    pub amount_usd: String,
    pub chain: Chain,
    pub destination: String,
    pub stripe_payment_intent: Option<String>,
}

/// `POST /v1/deposits`: persists a pending deposit.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateDepositBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let amount = MoneyAmount::parse(&body.amount_usd)
        .map_err(|e| ApiError::validation("amountUsd", e.to_string()))?;
    if amount.is_zero() {
        return Err(ApiError::validation("amountUsd", "amount must be positive"));
    }
    let destination = WalletAddress::parse_for_chain(&body.destination, body.chain)
        .map_err(|e| ApiError::validation("destination", e.to_string()))?;
    let deposit_id = state.store.mutate(|inner| {
        inner.insert_deposit(Deposit {
            org: org_id.clone(),
            amount_usd: amount,
            stripe_payment_intent: body.stripe_payment_intent.clone(),
            status: DepositStatus::Pending,
            chain: body.chain,
            destination: destination.clone(),
            created_at: now_millis(),
        })
    })?;
    Ok(data(json!({ "id": deposit_id.to_string(), "status": "pending" })))
}
