//! The wallet's view of its own spend history.
//!
//! Policy evaluation needs consistent aggregates over settled transactions
//! and recent attempts. The platform backs this with its store; tests use
//! [`MemoryLedger`] with fixed numbers.

use async_trait::async_trait;
use std::sync::Mutex;

use apitoll_types::money::TokenAmount;
use apitoll_types::policy::SpendSnapshot;

/// Source of spend aggregates and sink for payment outcomes.
#[async_trait]
pub trait SpendLedger: Send + Sync {
    /// A consistent snapshot of the agent's settled spend and attempt
    /// counts, tallied in `requestedAt` order.
    async fn snapshot(&self) -> SpendSnapshot;

    /// Counts one outbound payment attempt (before any I/O).
    async fn record_attempt(&self);

    /// Records a settled payment.
    async fn record_settled(&self, amount: TokenAmount);

    /// Records a payment whose request was cancelled after submission; the
    /// transfer may still land on-chain and must be reconciled later.
    async fn record_orphaned(&self, payment_id: &str);
}

/// In-memory ledger for tests and standalone agents.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryLedgerState>,
}

#[derive(Default)]
struct MemoryLedgerState {
    snapshot: SpendSnapshot,
    orphaned: Vec<String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        MemoryLedger::default()
    }

    pub fn with_snapshot(snapshot: SpendSnapshot) -> Self {
        MemoryLedger {
            state: Mutex::new(MemoryLedgerState {
                snapshot,
                orphaned: Vec::new(),
            }),
        }
    }

    pub fn orphaned(&self) -> Vec<String> {
        self.state.lock().expect("ledger lock").orphaned.clone()
    }

    pub fn current(&self) -> SpendSnapshot {
        self.state.lock().expect("ledger lock").snapshot
    }
}

#[async_trait]
impl SpendLedger for MemoryLedger {
    async fn snapshot(&self) -> SpendSnapshot {
        self.current()
    }

    async fn record_attempt(&self) {
        let mut state = self.state.lock().expect("ledger lock");
        state.snapshot.attempts_last_minute += 1;
        state.snapshot.attempts_last_hour += 1;
    }

    async fn record_settled(&self, amount: TokenAmount) {
        let mut state = self.state.lock().expect("ledger lock");
        state.snapshot.settled_today = state.snapshot.settled_today.saturating_add(amount);
        state.snapshot.settled_this_month =
            state.snapshot.settled_this_month.saturating_add(amount);
    }

    async fn record_orphaned(&self, payment_id: &str) {
        let mut state = self.state.lock().expect("ledger lock");
        state.orphaned.push(payment_id.to_string());
    }
}
