//! The payment gate: a tower layer implementing the 402 state machine.
//!
//! Per request:
//!
//! 1. No configured endpoint matches: pass straight through.
//! 2. Rate limit per client IP: 429.
//! 3. No `X-PAYMENT` header: 402 with the endpoint's payment requirements,
//!    mirrored base64-encoded in the `PAYMENT-REQUIRED` header.
//! 4. Header present: decode, match a requirement by network, verify with
//!    the facilitator. Failure: 402 with the reason.
//! 5. Verified: attach a [`PaymentReceipt`] extension, run the handler,
//!    and report the completed call to analytics in the background.
//!
//! Every response leaving the gate carries the platform security headers.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::response::Response;
use http::{HeaderValue, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use apitoll_types::fees::FeeBreakdown;
use apitoll_types::money::MoneyAmount;
use apitoll_types::proto::{
    FeeBreakdownWire, PAYMENT_REQUIRED_HEADER, PaymentAuthorization, PaymentRequiredBody,
    PaymentRequirement, Receipt, VerifyRequest, X_PAYMENT_HEADER,
};
use apitoll_types::timestamp::UnixTimestamp;

use crate::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use crate::headers::apply_security_headers;
use crate::limit::{MemoryRateGate, RateDecision, RateGate};
use crate::receipt::PaymentReceipt;
use crate::reporter::{CallReport, ReporterHandle};
use crate::route::EndpointConfig;

/// Default per-IP budget at the gate.
const GATE_LIMIT_PER_MINUTE: u32 = 120;

/// Payment-enforcing middleware. Configure with [`PaymentGate::with_endpoint`]
/// and apply as a tower [`Layer`].
#[derive(Clone)]
pub struct PaymentGate {
    state: Arc<GateState>,
}

struct GateState {
    endpoints: Vec<EndpointConfig>,
    facilitator: FacilitatorClient,
    rate_gate: Arc<dyn RateGate>,
    reporter: Option<ReporterHandle>,
}

impl PaymentGate {
    pub fn new(facilitator: FacilitatorClient) -> Self {
        PaymentGate {
            state: Arc::new(GateState {
                endpoints: Vec::new(),
                facilitator,
                rate_gate: Arc::new(MemoryRateGate::new(GATE_LIMIT_PER_MINUTE)),
                reporter: None,
            }),
        }
    }

    /// Adds one paid endpoint.
    pub fn with_endpoint(&self, endpoint: EndpointConfig) -> Self {
        let mut this = self.cloned_state();
        this.endpoints.push(endpoint);
        PaymentGate {
            state: Arc::new(this),
        }
    }

    /// Replaces the rate gate (the platform wires its shared limiter here).
    pub fn with_rate_gate(&self, rate_gate: Arc<dyn RateGate>) -> Self {
        let mut this = self.cloned_state();
        this.rate_gate = rate_gate;
        PaymentGate {
            state: Arc::new(this),
        }
    }

    /// Enables background analytics reporting.
    pub fn with_reporter(&self, reporter: ReporterHandle) -> Self {
        let mut this = self.cloned_state();
        this.reporter = Some(reporter);
        PaymentGate {
            state: Arc::new(this),
        }
    }

    fn cloned_state(&self) -> GateState {
        GateState {
            endpoints: self.state.endpoints.clone(),
            facilitator: self.state.facilitator.clone(),
            rate_gate: self.state.rate_gate.clone(),
            reporter: self.state.reporter.clone(),
        }
    }
}

impl TryFrom<&str> for PaymentGate {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(PaymentGate::new(FacilitatorClient::try_from(value)?))
    }
}

impl<S> Layer<S> for PaymentGate
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaymentGateService;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGateService {
            state: self.state.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The gate wrapped around one inner service.
#[derive(Clone)]
pub struct PaymentGateService {
    state: Arc<GateState>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for PaymentGateService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let state = self.state.clone();
        let inner = self.inner.clone();
        Box::pin(async move { Ok(handle(state, inner, req).await) })
    }
}

async fn handle(
    state: Arc<GateState>,
    mut inner: BoxCloneSyncService<Request, Response, Infallible>,
    mut req: Request,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(endpoint) = state
        .endpoints
        .iter()
        .find(|e| e.matches(&method, &path))
        .cloned()
    else {
        let mut response = inner.call(req).await.unwrap_or_else(|e| match e {});
        apply_security_headers(response.headers_mut());
        return response;
    };

    let ip = client_ip(&req);
    if let RateDecision::Limited { retry_after_secs } =
        state.rate_gate.check(&format!("ip:{ip}"))
    {
        return rate_limited_response(retry_after_secs);
    }

    let split = FeeBreakdown::split(endpoint.price_units, endpoint.fee.as_ref());
    let requirements = PaymentRequirement::for_chains(
        &endpoint.chains,
        endpoint.price_units,
        &endpoint.pay_to,
        &endpoint.description,
        endpoint.fee.as_ref(),
    );

    let Some(payment_header) = req.headers().get(X_PAYMENT_HEADER) else {
        return payment_required(&endpoint, &requirements, &split, None);
    };

    let authorization = match PaymentAuthorization::decode_header(payment_header.as_bytes()) {
        Ok(authorization) => authorization,
        Err(err) => {
            tracing::debug!(error = %err, "malformed X-PAYMENT header");
            return payment_required(
                &endpoint,
                &requirements,
                &split,
                Some("Invalid or malformed payment header"),
            );
        }
    };

    let Some(requirement) = requirements
        .iter()
        .find(|r| r.network == authorization.network)
        .cloned()
    else {
        return payment_required(
            &endpoint,
            &requirements,
            &split,
            Some("No payment requirement matches the provided network"),
        );
    };

    let verify_request = VerifyRequest {
        payload: authorization.clone(),
        requirements: requirement.clone(),
    };
    let outcome = match state.facilitator.verify(&verify_request).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::warn!(error = %err, "facilitator verification failed");
            return payment_required(
                &endpoint,
                &requirements,
                &split,
                Some("Payment verification failed"),
            );
        }
    };
    if !outcome.is_accepted() {
        let reason = outcome
            .error
            .unwrap_or_else(|| "Payment rejected".to_string());
        return payment_required(&endpoint, &requirements, &split, Some(&reason));
    }

    let receipt = Receipt {
        tx_hash: outcome.tx_hash.unwrap_or_default(),
        chain: authorization.network,
        amount: token_amount_as_money(&requirement),
        from: authorization.from.clone(),
        to: authorization.to.clone(),
        timestamp: UnixTimestamp::now(),
        block_number: None,
    };
    req.extensions_mut().insert(PaymentReceipt {
        receipt: receipt.clone(),
        fee: split.clone(),
        endpoint_id: endpoint.endpoint_id.clone(),
        endpoint_path: endpoint.pattern.as_str().to_string(),
    });

    let started = Instant::now();
    let mut response = inner.call(req).await.unwrap_or_else(|e| match e {});
    let latency_ms = started.elapsed().as_millis() as u64;

    if let Some(reporter) = &state.reporter {
        reporter.submit(CallReport {
            endpoint_id: endpoint.endpoint_id.clone(),
            endpoint_path: endpoint.pattern.as_str().to_string(),
            method: method.to_string(),
            receipt,
            response_status: response.status().as_u16(),
            latency_ms,
            fee_breakdown: FeeBreakdownWire::from(&split),
        });
    }

    apply_security_headers(response.headers_mut());
    response
}

fn token_amount_as_money(requirement: &PaymentRequirement) -> MoneyAmount {
    requirement
        .max_amount_required
        .to_money(u32::from(requirement.extra.decimals))
}

fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn rate_limited_response(retry_after_secs: u64) -> Response {
    let body = serde_json::json!({
        "error": "Rate limit exceeded",
        "retryAfter": retry_after_secs,
    });
    let mut response = Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("Content-Type", "application/json")
        .header("Retry-After", retry_after_secs.to_string())
        .body(Body::from(body.to_string()))
        .expect("static response construction");
    apply_security_headers(response.headers_mut());
    response
}

fn payment_required(
    endpoint: &EndpointConfig,
    requirements: &[PaymentRequirement],
    split: &FeeBreakdown,
    reason: Option<&str>,
) -> Response {
    let mut body = PaymentRequiredBody::new(
        requirements.to_vec(),
        &endpoint.description,
        Some(FeeBreakdownWire::from(split)),
    );
    if let Some(reason) = reason {
        body.error = reason.to_string();
    }
    let body_bytes = serde_json::to_vec(&body).expect("402 body serialization");
    let header = PaymentRequirement::encode_header(requirements)
        .expect("requirements header serialization");
    let header_value =
        HeaderValue::from_bytes(header.as_ref()).expect("base64 is a valid header value");
    let mut response = Response::builder()
        .status(StatusCode::PAYMENT_REQUIRED)
        .header("Content-Type", "application/json")
        .header(PAYMENT_REQUIRED_HEADER, header_value)
        .body(Body::from(body_bytes))
        .expect("402 response construction");
    apply_security_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_types::chain::Chain;
    use apitoll_types::fees::FeeConfig;
    use apitoll_types::money::TokenAmount;
    use http::Method;
    use tower::ServiceExt;

    fn gate() -> PaymentGate {
        let endpoint = EndpointConfig::new(
            Method::GET,
            "/api/joke",
            "0.005",
            &[Chain::Base],
            "0x71C7656EC7ab88b098defB751B7401B5f6d8976F",
        )
        .unwrap()
        .with_description("One fresh joke")
        .with_fee(FeeConfig {
            fee_bps: 300,
            platform_wallet: apitoll_types::address::WalletAddress::parse(
                "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
            )
            .unwrap(),
        });
        PaymentGate::try_from("http://127.0.0.1:9/").unwrap().with_endpoint(endpoint)
    }

    async fn call(gate: &PaymentGate, req: Request) -> Response {
        let service = gate.layer(tower::service_fn(|_req: Request| async {
            Ok::<_, Infallible>(Response::new(Body::from("ok")))
        }));
        service.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn unmatched_route_passes_through_with_headers() {
        let response = call(
            &gate(),
            http::Request::builder()
                .method(Method::GET)
                .uri("/free/route")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-frame-options").unwrap(),
            "DENY"
        );
    }

    #[tokio::test]
    async fn missing_payment_header_yields_402_challenge() {
        let response = call(
            &gate(),
            http::Request::builder()
                .method(Method::GET)
                .uri("/api/joke")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let header = response
            .headers()
            .get(PAYMENT_REQUIRED_HEADER)
            .expect("PAYMENT-REQUIRED header present")
            .clone();
        let requirements = PaymentRequirement::decode_header(header.as_bytes()).unwrap();
        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements[0].max_amount_required, TokenAmount(5000));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: PaymentRequiredBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "Payment Required");
        assert_eq!(body.payment_requirements, requirements);
        let fee = body.fee_breakdown.unwrap();
        assert_eq!(fee.seller_amount, TokenAmount(4850));
        assert_eq!(fee.platform_fee, TokenAmount(150));
    }

    #[tokio::test]
    async fn malformed_payment_header_yields_402_with_reason() {
        let response = call(
            &gate(),
            http::Request::builder()
                .method(Method::GET)
                .uri("/api/joke")
                .header(X_PAYMENT_HEADER, "!!not-base64!!")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: PaymentRequiredBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "Invalid or malformed payment header");
    }

    #[tokio::test]
    async fn rate_limit_yields_429() {
        let strict = gate().with_rate_gate(Arc::new(MemoryRateGate::new(1)));
        let request = || {
            http::Request::builder()
                .method(Method::GET)
                .uri("/api/joke")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap()
        };
        let first = call(&strict, request()).await;
        assert_eq!(first.status(), StatusCode::PAYMENT_REQUIRED);
        let second = call(&strict, request()).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let req = http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req), "203.0.113.7");
    }
}
