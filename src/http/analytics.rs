//! Analytics intake and summaries.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;

use apitoll_axum::reporter::CallReport;
use apitoll_store::tables::{TxStatus, WebhookEventType};
use apitoll_types::money::TokenAmount;
use apitoll_types::timestamp::now_millis;

use crate::billing::limits;
use crate::error::ApiError;
use crate::http::{clamp, data, gate_org};
use crate::revenue;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct IngestBody {
    pub reports: Vec<CallReport>,
}

/// `POST /v1/analytics/ingest`: batch intake from seller gates.
///
/// The ledger writes are payment-critical and fail the request; the
/// webhook fan-out is ancillary and never does.
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IngestBody>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, _org) = gate_org(&state, &headers)?;
    let now = now_millis();
    let mut recorded = 0usize;
    for report in &body.reports {
        revenue::record_call(&state.store, report, now)?;
        recorded += 1;

        let settled = report.response_status < 400;
        let event = if settled {
            WebhookEventType::PaymentCompleted
        } else {
            WebhookEventType::PaymentFailed
        };
        let payload = json!({
            "txHash": report.receipt.tx_hash,
            "chain": report.receipt.chain,
            "amount": report.fee_breakdown.total_amount,
            "endpoint": report.endpoint_path,
        });
        if let Err(err) = state.webhooks.emit(&org_id, event, payload) {
            tracing::warn!(error = %err, "payment webhook emit failed");
        }
    }
    Ok(data(json!({ "recorded": recorded })))
}

#[derive(Deserialize)]
pub struct SummaryParams {
    pub days: Option<i64>,
}

/// `GET /v1/analytics/summary`: org-scoped call and revenue summary,
/// retention-gated by plan.
pub async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SummaryParams>,
) -> Result<axum::Json<serde_json::Value>, ApiError> {
    let (org_id, org) = gate_org(&state, &headers)?;
    let retention = limits(org.plan).retention_days;
    let days = clamp(params.days, 1, retention as i64, 30.min(retention as i64)) as u64;
    let now = now_millis();
    let from = now.saturating_sub(days * 24 * 3600 * 1000);

    let (calls, settled, failed, volume) = state.store.read(|inner| {
        let mut calls = 0u64;
        let mut settled = 0u64;
        let mut failed = 0u64;
        let mut volume = TokenAmount::ZERO;
        for (_, tx) in inner.transactions.iter() {
            if tx.requested_at < from {
                continue;
            }
            let agent_in_org = tx
                .agent
                .as_ref()
                .and_then(|id| inner.agents.get(id))
                .is_some_and(|agent| agent.org == org_id);
            let seller_in_org = tx
                .seller
                .as_ref()
                .and_then(|id| inner.sellers.get(id))
                .is_some_and(|seller| seller.org.as_ref() == Some(&org_id));
            if !agent_in_org && !seller_in_org {
                continue;
            }
            calls += 1;
            match tx.status {
                TxStatus::Settled => {
                    settled += 1;
                    volume = volume.saturating_add(tx.amount);
                }
                TxStatus::Failed => failed += 1,
                _ => {}
            }
        }
        (calls, settled, failed, volume)
    });

    let buckets = revenue::aggregate(&state.store, from, now + 1, None, retention, now);
    Ok(data(json!({
        "days": days,
        "calls": calls,
        "settled": settled,
        "failed": failed,
        "volume": volume,
        "revenue": buckets,
    })))
}
