//! The transaction and revenue ledger.
//!
//! Analytics reports from seller gates become [`Transaction`] rows; settled
//! transactions with a platform fee also write a [`PlatformRevenue`] row.
//! Both writes happen in one store mutation so the ledger can never hold a
//! settled transaction without its fee row.

use serde::Serialize;

use apitoll_axum::reporter::CallReport;
use apitoll_store::document::IndexKey;
use apitoll_store::tables::{
    Endpoint, PlatformRevenue, Seller, Transaction, TxSplit, TxStatus,
};
use apitoll_store::{Id, Store, StoreError};
use apitoll_types::chain::Chain;
use apitoll_types::money::TokenAmount;

/// Records one completed paid call.
///
/// Status is derived from the downstream response: 2xx/3xx settles, the
/// rest fails. Returns the transaction id.
pub fn record_call(
    store: &Store,
    report: &CallReport,
    now_millis: u64,
) -> Result<Id<Transaction>, StoreError> {
    let settled = report.response_status < 400;
    let status = if settled {
        TxStatus::Settled
    } else {
        TxStatus::Failed
    };
    let report = report.clone();
    store.mutate(move |inner| {
        // Optional refs resolve best-effort; a gate configured before its
        // platform records exist still gets a ledger row.
        let agent = inner
            .agents
            .by_index(
                "by_wallet",
                IndexKey::single(report.receipt.from.to_string()),
            )
            .take(1)
            .collect()
            .into_iter()
            .next()
            .map(|(id, _)| id);
        let endpoint_id = report
            .endpoint_id
            .as_ref()
            .map(|raw| Id::<Endpoint>::from_string(raw.clone()))
            .filter(|id| inner.endpoints.get(id).is_some());
        let seller: Option<Id<Seller>> = endpoint_id
            .as_ref()
            .and_then(|id| inner.endpoints.get(id))
            .map(|endpoint| endpoint.seller.clone());

        let amount = report.fee_breakdown.total_amount;
        let tx_id = inner.insert_transaction(Transaction {
            tx_hash: if report.receipt.tx_hash.is_empty() {
                None
            } else {
                Some(report.receipt.tx_hash.clone())
            },
            agent_address: report.receipt.from.clone(),
            agent,
            seller,
            endpoint: endpoint_id.clone(),
            path: report.endpoint_path.clone(),
            method: report.method.clone(),
            amount,
            chain: report.receipt.chain,
            status,
            response_status: Some(report.response_status),
            latency_ms: Some(report.latency_ms),
            requested_at: now_millis.saturating_sub(report.latency_ms),
            settled_at: settled.then_some(now_millis),
            block_number: report.receipt.block_number,
            split: TxSplit {
                platform_fee: report.fee_breakdown.platform_fee,
                seller_amount: report.fee_breakdown.seller_amount,
                fee_bps: report.fee_breakdown.fee_bps,
            },
        })?;

        if settled {
            if !report.fee_breakdown.platform_fee.is_zero() {
                inner.insert_revenue(PlatformRevenue {
                    transaction: tx_id.clone(),
                    amount: report.fee_breakdown.platform_fee,
                    chain: report.receipt.chain,
                    fee_bps: report.fee_breakdown.fee_bps,
                    collected_at: now_millis,
                })?;
            }
            if let Some(endpoint_id) = &endpoint_id {
                inner.endpoints.patch(endpoint_id, |endpoint| {
                    endpoint.total_calls += 1;
                    endpoint.total_revenue = endpoint
                        .total_revenue
                        .saturating_add(report.fee_breakdown.seller_amount);
                    Ok(())
                })?;
            }
        }
        Ok(tx_id)
    })
}

/// One row of the revenue aggregation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueBucket {
    pub chain: Chain,
    pub total: TokenAmount,
    pub rows: usize,
}

/// Sums platform revenue over `[from, to)` millis, optionally filtered by
/// chain, grouped per chain.
///
/// `retention_days` clamps how far back the caller may look (plan-gated).
pub fn aggregate(
    store: &Store,
    from_millis: u64,
    to_millis: u64,
    chain: Option<Chain>,
    retention_days: u64,
    now_millis: u64,
) -> Vec<RevenueBucket> {
    let floor = now_millis.saturating_sub(retention_days * 24 * 3600 * 1000);
    let from_millis = from_millis.max(floor);
    store.read(|inner| {
        let mut buckets: Vec<RevenueBucket> = Vec::new();
        let rows = match chain {
            Some(chain) => inner
                .platform_revenue
                .by_index("by_chain", IndexKey::single(chain.caip2()))
                .collect(),
            None => inner
                .platform_revenue
                .by_index("by_collected_at", IndexKey::new())
                .collect(),
        };
        for (_, row) in rows {
            if row.collected_at < from_millis || row.collected_at >= to_millis {
                continue;
            }
            match buckets.iter_mut().find(|b| b.chain == row.chain) {
                Some(bucket) => {
                    bucket.total = bucket.total.saturating_add(row.amount);
                    bucket.rows += 1;
                }
                None => buckets.push(RevenueBucket {
                    chain: row.chain,
                    total: row.amount,
                    rows: 1,
                }),
            }
        }
        buckets
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_axum::reporter::CallReport;
    use apitoll_types::address::WalletAddress;
    use apitoll_types::money::MoneyAmount;
    use apitoll_types::proto::{FeeBreakdownWire, Receipt};
    use apitoll_types::timestamp::UnixTimestamp;

    const NOW: u64 = 1_773_596_730_000;

    fn report(status: u16) -> CallReport {
        CallReport {
            endpoint_id: None,
            endpoint_path: "/api/joke".to_string(),
            method: "GET".to_string(),
            receipt: Receipt {
                tx_hash: "0xabc".to_string(),
                chain: Chain::Base,
                amount: MoneyAmount::parse("0.005").unwrap(),
                from: WalletAddress::parse("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B")
                    .unwrap(),
                to: WalletAddress::parse("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").unwrap(),
                timestamp: UnixTimestamp::from_secs(NOW / 1000),
                block_number: Some(99),
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
    fn settled_call_writes_transaction_and_revenue_atomically() {
        let store = Store::new();
        let tx_id = record_call(&store, &report(200), NOW).unwrap();
        store.read(|inner| {
            let tx = inner.transactions.get(&tx_id).unwrap();
            assert_eq!(tx.status, TxStatus::Settled);
            assert_eq!(tx.amount, TokenAmount(5000));
            assert_eq!(tx.split.platform_fee, TokenAmount(150));
            assert_eq!(tx.split.seller_amount, TokenAmount(4850));
            // Fee conservation on the stored split.
            assert_eq!(
                tx.split.platform_fee + tx.split.seller_amount,
                tx.amount
            );
            assert_eq!(inner.platform_revenue.len(), 1);
            let (_, revenue) = inner.platform_revenue.iter().next().unwrap();
            assert_eq!(revenue.amount, TokenAmount(150));
            assert_eq!(revenue.transaction, tx_id);
        });
    }

    #[test]
    fn failed_call_writes_no_revenue() {
        let store = Store::new();
        let tx_id = record_call(&store, &report(500), NOW).unwrap();
        store.read(|inner| {
            assert_eq!(inner.transactions.get(&tx_id).unwrap().status, TxStatus::Failed);
            assert_eq!(inner.platform_revenue.len(), 0);
        });
    }

    #[test]
    fn zero_fee_settlement_writes_no_revenue_row() {
        let store = Store::new();
        let mut zero_fee = report(200);
        zero_fee.fee_breakdown = FeeBreakdownWire {
            total_amount: TokenAmount(5000),
            seller_amount: TokenAmount(5000),
            platform_fee: TokenAmount(0),
            fee_bps: 0,
        };
        record_call(&store, &zero_fee, NOW).unwrap();
        store.read(|inner| assert_eq!(inner.platform_revenue.len(), 0));
    }

    #[test]
    fn aggregation_groups_by_chain_and_clamps_retention() {
        let store = Store::new();
        record_call(&store, &report(200), NOW).unwrap();
        record_call(&store, &report(200), NOW).unwrap();
        // An old row outside the 7-day free retention window.
        record_call(&store, &report(200), NOW - 10 * 24 * 3600 * 1000).unwrap();

        let buckets = aggregate(&store, 0, NOW + 1, None, 7, NOW);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].chain, Chain::Base);
        assert_eq!(buckets[0].total, TokenAmount(300));
        assert_eq!(buckets[0].rows, 2);

        // Enterprise retention sees all three.
        let buckets = aggregate(&store, 0, NOW + 1, Some(Chain::Base), 365, NOW);
        assert_eq!(buckets[0].total, TokenAmount(450));
    }
}
