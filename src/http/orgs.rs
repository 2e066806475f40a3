//! Signup and tenant-owned account creation.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use apitoll_store::tables::{Agent, AgentStatus, DailyUsage, Organization, Plan, Seller};
use apitoll_types::address::WalletAddress;
use apitoll_types::chain::Chain;
use apitoll_types::money::TokenAmount;
use apitoll_types::timestamp::{day_key, now_millis};

use crate::billing::{check_agent_limit, check_seller_limit};
use crate::error::ApiError;
use crate::http::{data, gate_org, gate_public};
use crate::state::AppState;

fn generate_api_key(prefix: &str) -> String {
    use rand::Rng;
    let bytes: [u8; 24] = rand::rng().random();
    format!("{prefix}_{}", hex::encode(bytes))
}

#[derive(Deserialize)]
pub struct CreateOrgBody {
    pub name: String,
}

/// `POST /v1/organizations`: public signup; rate limited per IP.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrgBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    gate_public(&state, &headers)?;
    if body.name.trim().is_empty() {
        return Err(ApiError::validation("name", "name must not be empty"));
    }
    let api_key = generate_api_key("sk_live");
    let now = now_millis();
    let org_id = state.store.mutate(|inner| {
        inner.insert_organization(Organization {
            name: body.name.trim().to_string(),
            api_key: api_key.clone(),
            plan: Plan::Free,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            stripe_price_id: None,
            billing_period_end: None,
            daily_usage: DailyUsage {
                date: day_key(now),
                count: 0,
            },
            owner_identity: None,
            created_at: now,
        })
    })?;
    Ok(data(json!({
        "id": org_id.to_string(),
        "name": body.name.trim(),
        "plan": "free",
        // Shown exactly once.
        "apiKey": api_key,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentBody {
    pub name: String,
    pub wallet: String,
    pub chain: Chain,
}

/// `POST /v1/agents`: plan-gated by the agent limit.
pub async fn create_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateAgentBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    if !check_agent_limit(&state.store, &org_id)? {
        return Err(ApiError::validation(
            "plan",
            "agent limit reached for the current plan",
        ));
    }
    let wallet = WalletAddress::parse_for_chain(&body.wallet, body.chain)
        .map_err(|e| ApiError::validation("wallet", e.to_string()))?;
    let agent_id = state.store.mutate(|inner| {
        inner.insert_agent(Agent {
            org: org_id.clone(),
            name: body.name.clone(),
            wallet: wallet.clone(),
            chain: body.chain,
            balance: TokenAmount::ZERO,
            status: AgentStatus::Active,
            policies: vec![],
            created_at: now_millis(),
        })
    })?;
    Ok(data(json!({ "id": agent_id.to_string(), "wallet": wallet })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSellerBody {
    pub name: String,
    pub wallet: String,
}

/// `POST /v1/sellers`: plan-gated by the seller limit.
pub async fn create_seller(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSellerBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    if !check_seller_limit(&state.store, &org_id)? {
        return Err(ApiError::validation(
            "plan",
            "seller limit reached for the current plan",
        ));
    }
    let wallet = WalletAddress::parse(&body.wallet)
        .map_err(|e| ApiError::validation("wallet", e.to_string()))?;
    let api_key = generate_api_key("sk_seller");
    let seller_id = state.store.mutate(|inner| {
        inner.insert_seller(Seller {
            org: Some(org_id.clone()),
            name: body.name.clone(),
            wallet: wallet.clone(),
            api_key: api_key.clone(),
            created_at: now_millis(),
        })
    })?;
    Ok(data(json!({
        "id": seller_id.to_string(),
        "wallet": wallet,
        "apiKey": api_key,
    })))
}
