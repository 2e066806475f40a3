//! Billing surface: usage introspection and Stripe webhook intake.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde_json::json;

use apitoll_types::timestamp::{day_key, now_millis};

use crate::auth::require_org;
use crate::billing::limits;
use crate::error::ApiError;
use crate::http::data;
use crate::state::AppState;
use crate::stripe;

/// `GET /v1/billing/usage`: plan, today's counter and remaining budget.
///
/// Not metered: an org at its daily limit can still see why.
pub async fn usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (_org_id, org) = require_org(&state.store, &headers)?;
    let plan_limits = limits(org.plan);
    let today = day_key(now_millis());
    let used_today = if org.daily_usage.date == today {
        org.daily_usage.count
    } else {
        0
    };
    let remaining = plan_limits
        .max_calls_per_day
        .map(|limit| limit.saturating_sub(used_today));
    Ok(data(json!({
        "plan": org.plan,
        "date": today,
        "used": used_today,
        "remaining": remaining,
        "billingPeriodEnd": org.billing_period_end,
    })))
}

/// `POST /v1/billing/stripe/webhook`: signature-authenticated intake.
///
/// Unsigned bodies and signature mismatches return 401 before any parsing.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .ok_or(ApiError::Unauthorized)?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    if !stripe::verify_signature(&body, signature, secret) {
        return Err(ApiError::Unauthorized);
    }

    let outcome = stripe::reconcile(&state.store, &body).map_err(|err| match err {
        stripe::ReconcileError::Json(_) => {
            ApiError::validation("body", "event is not valid JSON")
        }
        stripe::ReconcileError::MissingField(field) => {
            ApiError::Validation {
                field: "body",
                message: format!("event is missing {field}"),
            }
        }
        stripe::ReconcileError::Store(e) => e.into(),
    })?;

    match &outcome {
        stripe::ReconcileOutcome::PlanActivated { plan } => {
            tracing::info!(?plan, "subscription reconciled");
        }
        stripe::ReconcileOutcome::PlanDowngraded => {
            tracing::info!("subscription deleted, org downgraded");
        }
        stripe::ReconcileOutcome::DepositProcessing { deposit_id } => {
            // The on-chain top-up runs as an internal action outside this
            // request.
            tracing::info!(deposit_id, "deposit flipped to processing, transfer enqueued");
        }
        stripe::ReconcileOutcome::UnknownCustomer { customer } => {
            tracing::warn!(customer, "stripe event for unknown customer");
        }
        stripe::ReconcileOutcome::Ignored { event_type } => {
            tracing::debug!(event_type, "ignored stripe event");
        }
    }
    Ok(data(json!({ "received": true })))
}
