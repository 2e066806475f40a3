//! Store-backed spend ledger for agent wallets.
//!
//! Bridges the platform store to the buyer-side policy engine: budget
//! windows are computed from the agent's settled transactions, read from
//! one consistent snapshot in `requestedAt` order. Attempt counters live in
//! process (attempts are a wallet-local concept; settled spend is not).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use apitoll_reqwest::ledger::SpendLedger;
use apitoll_store::document::IndexKey;
use apitoll_store::tables::{Agent, TxStatus};
use apitoll_store::{Id, Store};
use apitoll_types::money::TokenAmount;
use apitoll_types::policy::SpendSnapshot;
use apitoll_types::timestamp::{day_start_millis, month_start_millis, now_millis};

/// Spend aggregates from the store, attempt counts from process memory.
pub struct StoreSpendLedger {
    store: Store,
    agent: Id<Agent>,
    attempts: Mutex<VecDeque<u64>>,
    orphaned: Mutex<Vec<String>>,
}

impl StoreSpendLedger {
    pub fn new(store: Store, agent: Id<Agent>) -> Self {
        StoreSpendLedger {
            store,
            agent,
            attempts: Mutex::new(VecDeque::new()),
            orphaned: Mutex::new(Vec::new()),
        }
    }

    /// Payment ids whose requests were cancelled mid-flight; a
    /// reconciliation job matches them against the facilitator later.
    pub fn orphaned(&self) -> Vec<String> {
        self.orphaned.lock().expect("ledger lock").clone()
    }

    fn snapshot_at(&self, now: u64) -> SpendSnapshot {
        let day_start = day_start_millis(now);
        let month_start = month_start_millis(now);
        let (settled_today, settled_this_month) = self.store.read(|inner| {
            let mut today = TokenAmount::ZERO;
            let mut month = TokenAmount::ZERO;
            // Ascending by requestedAt; the month window bounds the scan.
            let rows = inner
                .transactions
                .by_index("by_agent", IndexKey::single(self.agent.to_string()))
                .collect();
            for (_, tx) in rows {
                if tx.status != TxStatus::Settled || tx.requested_at < month_start {
                    continue;
                }
                month = month.saturating_add(tx.amount);
                if tx.requested_at >= day_start {
                    today = today.saturating_add(tx.amount);
                }
            }
            (today, month)
        });

        let mut attempts = self.attempts.lock().expect("ledger lock");
        while attempts.front().is_some_and(|&t| t + 3_600_000 <= now) {
            attempts.pop_front();
        }
        let minute_cutoff = now.saturating_sub(60_000);
        let attempts_last_minute = attempts.iter().filter(|&&t| t > minute_cutoff).count() as u32;
        SpendSnapshot {
            settled_today,
            settled_this_month,
            attempts_last_minute,
            attempts_last_hour: attempts.len() as u32,
        }
    }
}

#[async_trait]
impl SpendLedger for StoreSpendLedger {
    async fn snapshot(&self) -> SpendSnapshot {
        self.snapshot_at(now_millis())
    }

    async fn record_attempt(&self) {
        self.attempts
            .lock()
            .expect("ledger lock")
            .push_back(now_millis());
    }

    async fn record_settled(&self, _amount: TokenAmount) {
        // Settled spend arrives through analytics ingest; the next snapshot
        // reads it from the store.
    }

    async fn record_orphaned(&self, payment_id: &str) {
        tracing::warn!(payment_id, "payment orphaned by cancellation");
        self.orphaned
            .lock()
            .expect("ledger lock")
            .push(payment_id.to_string());
    }
}
