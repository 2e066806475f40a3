//! The receipt attached to verified requests.

use apitoll_types::fees::FeeBreakdown;
use apitoll_types::proto::Receipt;

/// Request extension available to handlers behind the gate.
///
/// ```rust,ignore
/// async fn handler(Extension(payment): Extension<PaymentReceipt>) -> … {
///     tracing::info!(tx = %payment.receipt.tx_hash, "paid call");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PaymentReceipt {
    pub receipt: Receipt,
    pub fee: FeeBreakdown,
    /// Platform endpoint id, when the gate was configured with one.
    pub endpoint_id: Option<String>,
    /// The matched route pattern.
    pub endpoint_path: String,
}
