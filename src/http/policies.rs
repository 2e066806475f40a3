//! Spend policy management.
//!
//! Policies are stored org-wide or attached to one agent; the effective
//! set for an agent resolves latest-wins per (scope, rule type) and feeds
//! the buyer-side policy engine unchanged.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use apitoll_store::tables::{Agent, Policy};
use apitoll_store::Id;
use apitoll_types::policy::PolicyRule;
use apitoll_types::timestamp::now_millis;

use crate::error::ApiError;
use crate::http::{data, gate_org};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyBody {
    /// Attach to this agent; omit for an org-wide policy.
    pub agent_id: Option<String>,
    pub rule: PolicyRule,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// `POST /v1/policies`: stores a policy for the org or one of its agents.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePolicyBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let agent_id = body.agent_id.as_ref().map(|raw| Id::<Agent>::from_string(raw.clone()));
    if let Some(agent_id) = &agent_id {
        let owned = state
            .store
            .read(|inner| inner.agents.get(agent_id).map(|agent| agent.org.clone()))
            .is_some_and(|owner| owner == org_id);
        if !owned {
            return Err(ApiError::NotFound);
        }
    }
    let policy_id = state.store.mutate(|inner| {
        let policy_id = inner.insert_policy(Policy {
            org: org_id.clone(),
            agent: agent_id.clone(),
            rule: body.rule.clone(),
            active: body.active,
            created_at: now_millis(),
        })?;
        // Keep the agent's attachment list in evaluation order.
        if let Some(agent_id) = &agent_id {
            inner.agents.patch(agent_id, |agent| {
                agent.policies.push(policy_id.clone());
                Ok(())
            })?;
        }
        Ok(policy_id)
    })?;
    Ok(data(json!({ "id": policy_id.to_string() })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveParams {
    pub agent_id: Option<String>,
}

/// `GET /v1/policies`: the effective policy set, agent-scoped first.
pub async fn effective(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<EffectiveParams>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let agent_id = params.agent_id.map(Id::<Agent>::from_string);
    let policies = state
        .store
        .read(|inner| inner.effective_policies(&org_id, agent_id.as_ref()));
    Ok(data(policies))
}
