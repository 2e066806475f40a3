//! Alert rule storage. Evaluation runs outside the core.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use apitoll_store::document::{IndexKey, Order};
use apitoll_store::tables::{AlertMetric, AlertRule};
use apitoll_store::Id;
use apitoll_types::money::MoneyAmount;
use apitoll_types::timestamp::now_millis;

use crate::error::ApiError;
use crate::http::{data, gate_org};
use crate::state::AppState;

/// `GET /v1/alerts`: the org's alert rules, newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let rules: Vec<serde_json::Value> = state.store.read(|inner| {
        inner
            .alert_rules
            .by_index("by_org", IndexKey::single(org_id.to_string()))
            .order(Order::Desc)
            .take(100)
            .collect()
            .iter()
            .map(|(id, rule)| {
                json!({
                    "id": id.to_string(),
                    "name": rule.name,
                    "metric": rule.metric,
                    "threshold": rule.threshold,
                    "active": rule.active,
                })
            })
            .collect()
    });
    Ok(data(rules))
}

#[derive(Deserialize)]
pub struct CreateAlertBody {
    pub name: String,
    pub metric: AlertMetric,
    pub threshold: String,
}

/// `POST /v1/alerts`.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateAlertBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let threshold = MoneyAmount::parse(&body.threshold)
        .map_err(|e| ApiError::validation("threshold", e.to_string()))?;
    let rule_id = state.store.mutate(|inner| {
        inner.insert_alert_rule(AlertRule {
            org: org_id.clone(),
            name: body.name.clone(),
            metric: body.metric,
            threshold,
            active: true,
            created_at: now_millis(),
        })
    })?;
    Ok(data(json!({ "id": rule_id.to_string() })))
}

/// `DELETE /v1/alerts/{id}`.
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let rule_id = Id::<AlertRule>::from_string(id);
    let owned = state
        .store
        .read(|inner| inner.alert_rules.get(&rule_id).map(|rule| rule.org.clone()))
        .is_some_and(|owner| owner == org_id);
    if !owned {
        return Err(ApiError::NotFound);
    }
    state
        .store
        .mutate(|inner| inner.alert_rules.remove(&rule_id).map(|_| ()))?;
    Ok(data(json!({ "deleted": true })))
}
