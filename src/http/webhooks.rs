//! Webhook management surface.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use apitoll_store::document::IndexKey;
use apitoll_store::tables::{
    DeliveryStatus, Webhook, WebhookDelivery, WebhookEventType,
};
use apitoll_store::Id;
use apitoll_types::timestamp::now_millis;

use crate::error::ApiError;
use crate::http::{data, gate_org};
use crate::state::AppState;
use crate::webhook::validate_webhook_url;

fn generate_secret() -> String {
    use rand::Rng;
    let bytes: [u8; 24] = rand::rng().random();
    format!("whsec_{}", hex::encode(bytes))
}

fn webhook_json(id: &Id<Webhook>, webhook: &Webhook) -> serde_json::Value {
    json!({
        "id": id.to_string(),
        "url": webhook.url,
        "events": webhook.events,
        "enabled": webhook.enabled,
        "failureCount": webhook.failure_count,
        "status": if webhook.is_failing() { "failing" } else { "active" },
        "createdAt": webhook.created_at,
    })
}

/// Fetches a webhook and proves org ownership, or 404s.
fn owned_webhook(
    state: &AppState,
    org_id: &Id<apitoll_store::tables::Organization>,
    id: &str,
) -> Result<(Id<Webhook>, Webhook), ApiError> {
    let webhook_id = Id::<Webhook>::from_string(id);
    state
        .store
        .read(|inner| inner.webhooks.get(&webhook_id).cloned())
        .filter(|webhook| &webhook.org == org_id)
        .map(|webhook| (webhook_id, webhook))
        .ok_or(ApiError::NotFound)
}

/// `GET /v1/webhooks`: the org's webhooks. Secrets are never echoed.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let webhooks: Vec<serde_json::Value> = state.store.read(|inner| {
        inner
            .webhooks
            .by_index("by_org", IndexKey::single(org_id.to_string()))
            .collect()
            .iter()
            .map(|(id, webhook)| webhook_json(id, webhook))
            .collect()
    });
    Ok(data(webhooks))
}

#[derive(Deserialize)]
pub struct RegisterWebhookBody {
    pub url: String,
    pub events: Vec<WebhookEventType>,
}

/// `POST /v1/webhooks`: registers an endpoint. The signing secret is
/// returned exactly once.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterWebhookBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    if body.events.is_empty() {
        return Err(ApiError::validation(
            "events",
            "subscribe to at least one event",
        ));
    }
    let url = validate_webhook_url(&body.url)
        .await
        .map_err(|e| ApiError::validation("url", e.to_string()))?;
    let secret = generate_secret();
    let webhook_id = state.store.mutate(|inner| {
        inner.insert_webhook(Webhook {
            org: org_id.clone(),
            url: url.to_string(),
            events: body.events.clone(),
            secret: secret.clone(),
            enabled: true,
            failure_count: 0,
            created_at: now_millis(),
        })
    })?;
    Ok(data(json!({
        "id": webhook_id.to_string(),
        "url": url.to_string(),
        "secret": secret,
    })))
}

/// `DELETE /v1/webhooks/{id}`.
pub async fn remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let (webhook_id, _webhook) = owned_webhook(&state, &org_id, &id)?;
    state
        .store
        .mutate(|inner| inner.webhooks.remove(&webhook_id).map(|_| ()))?;
    Ok(data(json!({ "deleted": true })))
}

/// `POST /v1/webhooks/{id}/test`: queues a `test.ping` delivery directly
/// to this webhook, subscription list notwithstanding.
pub async fn test_ping(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let (webhook_id, _webhook) = owned_webhook(&state, &org_id, &id)?;
    let now = now_millis();
    let delivery_id = state.store.mutate(|inner| {
        inner.insert_delivery(WebhookDelivery {
            webhook: webhook_id.clone(),
            event: WebhookEventType::TestPing,
            payload: json!({ "message": "ping" }),
            delivery_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_status_code: None,
            last_duration_ms: None,
            created_at: now,
        })
    })?;
    state.webhooks.nudge();
    Ok(data(json!({ "deliveryId": delivery_id.to_string() })))
}

/// `POST /v1/webhooks/{id}/rotate`: atomically replaces the signing
/// secret; queued deliveries sign with the new secret at send time.
pub async fn rotate_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let (webhook_id, _webhook) = owned_webhook(&state, &org_id, &id)?;
    let secret = generate_secret();
    state.store.mutate(|inner| {
        inner.webhooks.patch(&webhook_id, |webhook| {
            webhook.secret = secret.clone();
            Ok(())
        })
    })?;
    Ok(data(json!({ "id": webhook_id.to_string(), "secret": secret })))
}
