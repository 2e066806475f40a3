//! Dispute surface.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use apitoll_store::document::{IndexKey, Order};
use apitoll_store::tables::{Dispute, DisputeStatus, Transaction, WebhookEventType};
use apitoll_store::Id;
use apitoll_types::timestamp::now_millis;

use crate::error::ApiError;
use crate::http::{data, gate_org};
use crate::state::AppState;

fn dispute_json(id: &Id<Dispute>, dispute: &Dispute) -> serde_json::Value {
    json!({
        "id": id.to_string(),
        "transaction": dispute.transaction.to_string(),
        "reason": dispute.reason,
        "status": dispute.status,
        "resolution": dispute.resolution,
        "openedAt": dispute.opened_at,
        "resolvedAt": dispute.resolved_at,
    })
}

/// `GET /v1/disputes`: the org's disputes, newest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let disputes: Vec<serde_json::Value> = state.store.read(|inner| {
        inner
            .disputes
            .by_index("by_org", IndexKey::single(org_id.to_string()))
            .order(Order::Desc)
            .take(100)
            .collect()
            .iter()
            .map(|(id, dispute)| dispute_json(id, dispute))
            .collect()
    });
    Ok(data(disputes))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDisputeBody {
    pub transaction_id: String,
    pub reason: String,
}

/// `POST /v1/disputes`: opens a dispute over one transaction.
pub async fn open(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<OpenDisputeBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    if body.reason.trim().is_empty() {
        return Err(ApiError::validation("reason", "reason must not be empty"));
    }
    let tx_id = Id::<Transaction>::from_string(body.transaction_id.clone());
    let dispute_id = state.store.mutate(|inner| {
        inner.insert_dispute(Dispute {
            org: org_id.clone(),
            transaction: tx_id.clone(),
            reason: body.reason.trim().to_string(),
            status: DisputeStatus::Open,
            resolution: None,
            opened_at: now_millis(),
            resolved_at: None,
        })
    })?;
    if let Err(err) = state.webhooks.emit(
        &org_id,
        WebhookEventType::DisputeOpened,
        json!({ "disputeId": dispute_id.to_string(), "transaction": tx_id.to_string() }),
    ) {
        tracing::warn!(error = %err, "dispute.opened emit failed");
    }
    Ok(data(json!({ "id": dispute_id.to_string() })))
}

#[derive(Deserialize)]
pub struct ResolveDisputeBody {
    pub resolution: String,
    #[serde(default)]
    pub rejected: bool,
}

/// `POST /v1/disputes/{id}/resolve`: closes an open dispute.
pub async fn resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ResolveDisputeBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let dispute_id = Id::<Dispute>::from_string(id);
    state.store.mutate(|inner| {
        let dispute = inner
            .disputes
            .get(&dispute_id)
            .ok_or(apitoll_store::StoreError::NotFound {
                table: "disputes",
                id: dispute_id.to_string(),
            })?;
        if dispute.org != org_id {
            return Err(apitoll_store::StoreError::NotFound {
                table: "disputes",
                id: dispute_id.to_string(),
            });
        }
        if dispute.status != DisputeStatus::Open {
            return Err(apitoll_store::StoreError::Conflict(
                "dispute is already resolved".to_string(),
            ));
        }
        inner.disputes.patch(&dispute_id, |dispute| {
            dispute.status = if body.rejected {
                DisputeStatus::Rejected
            } else {
                DisputeStatus::Resolved
            };
            dispute.resolution = Some(body.resolution.clone());
            dispute.resolved_at = Some(now_millis());
            Ok(())
        })
    })?;
    if let Err(err) = state.webhooks.emit(
        &org_id,
        WebhookEventType::DisputeResolved,
        json!({ "disputeId": dispute_id.to_string() }),
    ) {
        tracing::warn!(error = %err, "dispute.resolved emit failed");
    }
    Ok(data(json!({ "id": dispute_id.to_string() })))
}
