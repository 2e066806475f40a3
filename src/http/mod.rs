//! The platform's typed HTTP surface.
//!
//! Thin layer: argument parsing, integer clamping, API-key
//! authentication, per-request plan metering, CORS from an explicit
//! allow-list and the JSON `{data}`/`{error}` envelope. Domain behavior
//! lives in the sibling modules; handlers only wire it to HTTP.

pub mod alerts;
pub mod analytics;
pub mod billing_routes;
pub mod deposits;
pub mod discovery;
pub mod disputes;
pub mod orgs;
pub mod policies;
pub mod webhooks;

use axum::Router;
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::middleware::map_response;
use axum::response::Response;
use axum::routing::{get, post};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use apitoll_axum::headers::apply_security_headers;
use apitoll_axum::limit::RateGate;
use apitoll_store::tables::Organization;
use apitoll_store::Id;
use apitoll_types::timestamp::now_millis;

use crate::auth::require_org;
use crate::billing::{increment_usage, UsageDecision};
use crate::error::ApiError;
use crate::state::AppState;

/// Builds the full router with CORS and security headers applied.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins());
    Router::new()
        .route("/health", get(get_health))
        .route("/v1/organizations", post(orgs::create))
        .route("/v1/discovery/tools", get(discovery::search))
        .route("/v1/tools/{slug}", get(discovery::get_by_slug))
        .route("/v1/tools", post(discovery::register))
        .route("/v1/tools/{slug}/listing", post(discovery::update))
        .route("/v1/agents", post(orgs::create_agent))
        .route("/v1/sellers", post(orgs::create_seller))
        .route("/v1/policies", get(policies::effective).post(policies::create))
        .route("/v1/alerts", get(alerts::list).post(alerts::create))
        .route("/v1/alerts/{id}", axum::routing::delete(alerts::remove))
        .route("/v1/billing/usage", get(billing_routes::usage))
        .route(
            "/v1/billing/stripe/webhook",
            post(billing_routes::stripe_webhook),
        )
        .route("/v1/analytics/ingest", post(analytics::ingest))
        .route("/v1/analytics/summary", get(analytics::summary))
        .route("/v1/disputes", get(disputes::list).post(disputes::open))
        .route("/v1/disputes/{id}/resolve", post(disputes::resolve))
        .route("/v1/deposits", get(deposits::list).post(deposits::create))
        .route("/v1/webhooks", get(webhooks::list).post(webhooks::register))
        .route("/v1/webhooks/{id}", axum::routing::delete(webhooks::remove))
        .route("/v1/webhooks/{id}/test", post(webhooks::test_ping))
        .route("/v1/webhooks/{id}/rotate", post(webhooks::rotate_secret))
        .layer(map_response(set_security_headers))
        .layer(cors)
        .with_state(state)
}

async fn set_security_headers(mut response: Response) -> Response {
    apply_security_headers(response.headers_mut());
    response
}

/// CORS from the configured allow-list. An empty list denies all
/// cross-origin requests; a wildcard is never combined with credentials.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::PATCH])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderName::from_static("x-api-key"),
        ])
}

async fn get_health() -> axum::Json<serde_json::Value> {
    axum::Json(json!({ "status": "ok" }))
}

/// The success envelope.
pub fn data<T: Serialize>(value: T) -> axum::Json<serde_json::Value> {
    axum::Json(json!({ "data": value }))
}

/// Clamps an optional integer query parameter into `[min, max]`, applying
/// `default` when absent.
pub fn clamp(value: Option<i64>, min: i64, max: i64, default: i64) -> i64 {
    value.unwrap_or(default).clamp(min, max)
}

/// Authenticates the org and meters the request against its plan.
pub fn gate_org(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(Id<Organization>, Organization), ApiError> {
    let (org_id, org) = require_org(&state.store, headers)?;
    match increment_usage(&state.store, &org_id, now_millis())? {
        UsageDecision::Allowed { .. } => Ok((org_id, org)),
        UsageDecision::Denied { remaining } => Err(ApiError::PlanLimitReached { remaining }),
    }
}

/// Rate-limits a public route per client IP (50/min default budget).
pub fn gate_public(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let ip = client_ip(headers);
    match state.public_limiter.check(&format!("ip:{ip}")) {
        apitoll_axum::limit::RateDecision::Allowed { .. } => Ok(()),
        apitoll_axum::limit::RateDecision::Limited { retry_after_secs } => {
            Err(ApiError::RateLimited {
                retry_after_secs,
            })
        }
    }
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_applies_bounds_and_default() {
        assert_eq!(clamp(None, 1, 50, 20), 20);
        assert_eq!(clamp(Some(5), 1, 50, 20), 5);
        assert_eq!(clamp(Some(0), 1, 50, 20), 1);
        assert_eq!(clamp(Some(500), 1, 50, 20), 50);
        assert_eq!(clamp(Some(-3), 1, 50, 20), 1);
    }

    #[test]
    fn client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.9");
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }
}
