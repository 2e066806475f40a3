//! Background analytics reporter.
//!
//! The gate never blocks a response on analytics. Completed calls are
//! enqueued onto a bounded channel; a background task batches them (up to 50
//! per batch, flushed at least every 5 seconds) and ships them to the
//! platform ingest endpoint. A failed shipment is re-queued up to a cap of
//! 500 buffered reports; beyond that the oldest reports are dropped with a
//! warning.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use apitoll_types::proto::{FeeBreakdownWire, Receipt};

const BATCH_SIZE: usize = 50;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const SHIP_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEUE_CAP: usize = 500;
const CHANNEL_CAP: usize = 1024;

/// One completed paid call, as reported to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    pub endpoint_path: String,
    pub method: String,
    pub receipt: Receipt,
    pub response_status: u16,
    pub latency_ms: u64,
    pub fee_breakdown: FeeBreakdownWire,
}

/// Cheap handle held by the gate.
#[derive(Clone, Debug)]
pub struct ReporterHandle {
    tx: mpsc::Sender<CallReport>,
}

impl ReporterHandle {
    /// Enqueues a report. Drops it (with a warning) when the queue is full;
    /// reporting must never slow the request path.
    pub fn submit(&self, report: CallReport) {
        if let Err(err) = self.tx.try_send(report) {
            tracing::warn!(error = %err, "analytics queue full, dropping report");
        }
    }
}

/// The background shipping task.
pub struct Reporter {
    ingest_url: Url,
    api_key: String,
    client: Client,
}

impl Reporter {
    /// Spawns the shipping task and returns the submit handle.
    pub fn spawn(
        ingest_url: Url,
        api_key: impl Into<String>,
        shutdown: CancellationToken,
    ) -> ReporterHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_CAP);
        let reporter = Reporter {
            ingest_url,
            api_key: api_key.into(),
            client: Client::new(),
        };
        tokio::spawn(reporter.run(rx, shutdown));
        ReporterHandle { tx }
    }

    async fn run(self, mut rx: mpsc::Receiver<CallReport>, shutdown: CancellationToken) {
        let mut backlog: VecDeque<CallReport> = VecDeque::new();
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Final best-effort flush.
                    while let Ok(report) = rx.try_recv() {
                        backlog.push_back(report);
                    }
                    self.flush(&mut backlog).await;
                    return;
                }
                maybe = rx.recv() => {
                    match maybe {
                        Some(report) => {
                            backlog.push_back(report);
                            if backlog.len() >= BATCH_SIZE {
                                self.flush(&mut backlog).await;
                            }
                        }
                        None => {
                            self.flush(&mut backlog).await;
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut backlog).await;
                }
            }
        }
    }

    async fn flush(&self, backlog: &mut VecDeque<CallReport>) {
        while !backlog.is_empty() {
            let batch: Vec<CallReport> = backlog
                .drain(..backlog.len().min(BATCH_SIZE))
                .collect();
            match self.ship(&batch).await {
                Ok(()) => {}
                Err(err) => {
                    tracing::warn!(error = %err, count = batch.len(), "analytics batch failed, re-queueing");
                    for report in batch.into_iter().rev() {
                        backlog.push_front(report);
                    }
                    while backlog.len() > REQUEUE_CAP {
                        backlog.pop_front();
                        tracing::warn!("analytics backlog over cap, dropping oldest report");
                    }
                    // Leave the rest for the next tick instead of hammering
                    // a failing intake.
                    return;
                }
            }
        }
    }

    async fn ship(&self, batch: &[CallReport]) -> Result<(), reqwest::Error> {
        let response = self
            .client
            .post(self.ingest_url.clone())
            .timeout(SHIP_TIMEOUT)
            .header("X-API-Key", &self.api_key)
            .json(&serde_json::json!({ "reports": batch }))
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_types::address::WalletAddress;
    use apitoll_types::chain::Chain;
    use apitoll_types::money::{MoneyAmount, TokenAmount};
    use apitoll_types::timestamp::UnixTimestamp;

    fn report(status: u16) -> CallReport {
        CallReport {
            endpoint_id: None,
            endpoint_path: "/api/joke".to_string(),
            method: "GET".to_string(),
            receipt: Receipt {
                tx_hash: "0xabc".to_string(),
                chain: Chain::Base,
                amount: MoneyAmount::parse("0.005").unwrap(),
                from: WalletAddress::parse("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B").unwrap(),
                to: WalletAddress::parse("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").unwrap(),
                timestamp: UnixTimestamp::from_secs(1_800_000_000),
                block_number: Some(123),
            },
            response_status: status,
            latency_ms: 42,
            fee_breakdown: FeeBreakdownWire {
                total_amount: TokenAmount(5000),
                seller_amount: TokenAmount(4850),
                platform_fee: TokenAmount(150),
                fee_bps: 300,
            },
        }
    }

    #[test]
    fn report_serializes_camel_case() {
        let json = serde_json::to_value(report(200)).unwrap();
        assert_eq!(json["endpointPath"], "/api/joke");
        assert_eq!(json["responseStatus"], 200);
        assert_eq!(json["feeBreakdown"]["platformFee"], "150");
        assert_eq!(json["receipt"]["txHash"], "0xabc");
    }

    #[tokio::test]
    async fn submit_does_not_block_when_worker_is_gone() {
        let shutdown = CancellationToken::new();
        let handle = Reporter::spawn(
            Url::parse("http://127.0.0.1:9/ingest").unwrap(),
            "sk-test",
            shutdown.clone(),
        );
        shutdown.cancel();
        // Even after shutdown, submit must not panic or block.
        handle.submit(report(200));
    }
}
