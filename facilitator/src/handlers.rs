//! HTTP endpoints of the facilitator.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tracing::instrument;

use apitoll_store::tables::PaymentStatus;
use apitoll_types::facilitator::{PayAccepted, PayRequest};
use apitoll_types::proto::{VerifyRequest, X_PAYMENT_RECEIPT_HEADER};
use apitoll_types::timestamp::UnixTimestamp;
use apitoll_types::util::Base64Bytes;

use crate::guard::check_replay_url;
use crate::ledger::{view, LedgerError};
use crate::state::AppState;
use crate::verify;
use crate::worker;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
        .route("/pay", post(post_pay))
        .route("/pay/{id}", get(get_pay))
        .route("/forward/{id}", post(post_forward))
        .route("/verify", post(post_verify))
}

/// Errors rendered to API consumers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("payment {0} not found")]
    NotFound(String),
    #[error("payment {id} is {status}, not completed")]
    NotCompleted { id: String, status: PaymentStatus },
    #[error("unauthorized")]
    Unauthorized,
    #[error("origin request failed: {0}")]
    Origin(String),
    #[error("internal error")]
    Internal,
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unauthorized => ApiError::Unauthorized,
            LedgerError::NotFound(id) => ApiError::NotFound(id),
            LedgerError::Store(apitoll_store::StoreError::NotFound { id, .. }) => {
                ApiError::NotFound(id)
            }
            LedgerError::Store(e) => {
                tracing::error!(error = %e, "store error");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotCompleted { .. } => StatusCode::CONFLICT,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Origin(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `GET /`: greeting, useful as a liveness probe target.
#[instrument(skip_all)]
async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /health`: readiness: reports configured chains.
#[instrument(skip_all)]
async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let chains: Vec<&str> = apitoll_types::chain::Chain::variants()
        .iter()
        .filter(|chain| state.executors.for_chain(**chain).is_some())
        .map(|chain| chain.caip2())
        .collect();
    Json(json!({ "status": "ok", "chains": chains }))
}

/// `POST /pay`: validates, persists idempotently and schedules execution.
/// Responds 202; settlement is asynchronous.
#[instrument(skip_all, fields(url = %body.original_url))]
async fn post_pay(
    State(state): State<AppState>,
    Json(body): Json<PayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_replay_url(&body.original_url)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if body.agent_auth.network != body.payment_required.network {
        return Err(ApiError::BadRequest(
            "authorization network does not match requirement".to_string(),
        ));
    }
    if body.agent_auth.value != body.payment_required.max_amount_required {
        return Err(ApiError::BadRequest(
            "authorization amount does not match requirement".to_string(),
        ));
    }

    let outcome = state.ledger.intake(&state.config.shared_secret, &body)?;
    if outcome.created {
        worker::schedule(state.clone(), outcome.payment_id.clone());
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(PayAccepted {
            payment_id: outcome.payment_id,
            status: outcome.status,
        }),
    ))
}

/// `GET /pay/{id}`: current record.
#[instrument(skip_all, fields(payment_id = %id))]
async fn get_pay(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.ledger.get(&id).ok_or(ApiError::NotFound(id))?;
    Ok(Json(view(&record)))
}

/// `POST /forward/{id}`: replays the captured original request to the
/// origin with the settlement receipt attached, and relays the origin's
/// status and body back.
#[instrument(skip_all, fields(payment_id = %id))]
async fn post_forward(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = state
        .ledger
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(id.clone()))?;
    if record.status != PaymentStatus::Completed {
        return Err(ApiError::NotCompleted {
            id,
            status: record.status,
        });
    }

    let method = record
        .original
        .method
        .parse::<reqwest::Method>()
        .map_err(|_| ApiError::BadRequest("stored method is invalid".to_string()))?;
    let mut builder = state.http.request(method, record.original.url.clone());
    for (name, value) in &record.original.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = &record.original.body {
        builder = builder.body(body.clone());
    }

    let receipt = json!({
        "paymentId": record.payment_id,
        "txHash": record.tx_hash,
        "chain": record.requirement.network,
        "amount": record.requirement.max_amount_required,
        "from": record.agent_wallet,
        "to": record.seller_address,
        "blockNumber": record.block_number,
    });
    let receipt_header = Base64Bytes::encode_json(&receipt)
        .map_err(|_| ApiError::Internal)?
        .to_string();
    builder = builder.header(X_PAYMENT_RECEIPT_HEADER, receipt_header);

    let origin_response = builder
        .send()
        .await
        .map_err(|e| ApiError::Origin(e.to_string()))?;

    let status =
        StatusCode::from_u16(origin_response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = origin_response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = origin_response
        .bytes()
        .await
        .map_err(|e| ApiError::Origin(e.to_string()))?;

    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .body(Body::from(bytes))
        .map_err(|_| ApiError::Internal)
}

/// `POST /verify`: verify-only; inspects the authorization and on-chain
/// nonce state but never submits.
#[instrument(skip_all)]
async fn post_verify(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> impl IntoResponse {
    let outcome = verify::verify(&body, &state.executors, UnixTimestamp::now()).await;
    Json(outcome)
}
