//! Axum middleware for paid endpoints.
//!
//! [`PaymentGate`] wraps a route and enforces the 402 handshake in front of
//! it: no payment header gets a machine-readable challenge, a payment header
//! is verified against the configured facilitator, verified requests carry a
//! [`PaymentReceipt`] extension into the handler, and every completed
//! response is reported to the platform's analytics intake in the
//! background.
//!
//! ## Example
//!
//! ```rust,no_run
//! use axum::{Router, routing::get, Json};
//! use serde_json::json;
//! use apitoll_axum::{EndpointConfig, PaymentGate};
//! use apitoll_types::Chain;
//!
//! let endpoint = EndpointConfig::new(
//!     http::Method::GET,
//!     "/api/joke",
//!     "0.005",
//!     &[Chain::Base],
//!     "0x71C7656EC7ab88b098defB751B7401B5f6d8976F",
//! )
//! .unwrap()
//! .with_description("One fresh joke");
//!
//! let gate = PaymentGate::try_from("https://facilitator.apitoll.dev/")
//!     .unwrap()
//!     .with_endpoint(endpoint);
//!
//! let app: Router = Router::new().route(
//!     "/api/joke",
//!     get(|| async { Json(json!({"joke": "…"})) }).layer(gate),
//! );
//! ```

pub mod facilitator_client;
pub mod headers;
pub mod layer;
pub mod limit;
pub mod receipt;
pub mod reporter;
pub mod route;

pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{PaymentGate, PaymentGateService};
pub use limit::{MemoryRateGate, RateDecision, RateGate};
pub use receipt::PaymentReceipt;
pub use reporter::{CallReport, Reporter, ReporterHandle};
pub use route::{EndpointConfig, PathPattern};
