//! Payment execution and startup recovery.
//!
//! Each accepted payment is driven by its own task: claim the record with a
//! `pending → processing` compare-and-set, run the transfer with backoff,
//! then settle the terminal state. Workers racing the same payment lose the
//! CAS and stop, so a payment is executed at most once per process.

use std::time::Duration;

use apitoll_store::tables::{FacilitatorPayment, PaymentStatus};

use crate::state::AppState;
use crate::transfer::{FailureClass, TransferError};

/// Backoff ladder for transient transfer failures: one delay per failure,
/// consumed in order. A transient failure past the end of the ladder is
/// terminal, so a payment is submitted at most four times. The submit
/// counter persists on the record; recovery carries it over, and a crash
/// loop still converges on `failed`.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(30),
];

/// Spawns the execution task for one payment.
pub fn schedule(state: AppState, payment_id: String) {
    let tracker = state.tasks.clone();
    tracker.spawn(async move {
        execute(state, &payment_id).await;
    });
}

/// Drives one payment to a terminal state.
async fn execute(state: AppState, payment_id: &str) {
    let secret = state.config.shared_secret.clone();
    if state
        .ledger
        .transition(
            &secret,
            payment_id,
            PaymentStatus::Pending,
            PaymentStatus::Processing,
            |_| {},
        )
        .is_err()
    {
        // Another worker claimed it, or it is already terminal.
        return;
    }
    run_transfer_loop(&state, payment_id).await;
}

async fn run_transfer_loop(state: &AppState, payment_id: &str) {
    let secret = state.config.shared_secret.clone();
    loop {
        let Some(record) = state.ledger.get(payment_id) else {
            tracing::error!(payment_id, "payment disappeared mid-execution");
            return;
        };
        if record.status != PaymentStatus::Processing {
            return;
        }

        let attempts = match state.ledger.record_submit_attempt(&secret, payment_id) {
            Ok(attempts) => attempts,
            Err(err) => {
                tracing::error!(payment_id, error = %err, "failed to count submit attempt");
                return;
            }
        };

        match attempt_transfer(state, &record).await {
            Ok((tx_hash, block_number)) => {
                let result = state.ledger.transition(
                    &secret,
                    payment_id,
                    PaymentStatus::Processing,
                    PaymentStatus::Completed,
                    |record| {
                        record.tx_hash = Some(tx_hash.clone());
                        record.block_number = block_number;
                    },
                );
                if let Err(err) = result {
                    tracing::error!(payment_id, error = %err, "failed to complete payment");
                }
                tracing::info!(payment_id, tx_hash = %tx_hash, "payment completed");
                return;
            }
            Err(err) if err.class == FailureClass::Transient => {
                let Some(delay) = RETRY_DELAYS.get(attempts as usize - 1).copied() else {
                    // Ladder exhausted.
                    fail(state, payment_id, &err.to_string());
                    return;
                };
                tracing::warn!(
                    payment_id,
                    attempts,
                    error = %err,
                    "transient transfer failure, retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                fail(state, payment_id, &err.to_string());
                return;
            }
        }
    }
}

async fn attempt_transfer(
    state: &AppState,
    record: &FacilitatorPayment,
) -> Result<(String, Option<u64>), TransferError> {
    let chain = record.requirement.network;
    let executor = state.executors.for_chain(chain).ok_or(TransferError {
        class: FailureClass::Validation,
        message: format!("no executor configured for chain {chain}"),
    })?;
    let outcome = executor
        .transfer(&record.seller_address, record.requirement.max_amount_required)
        .await?;
    Ok((outcome.tx_hash, outcome.block_number))
}

fn fail(state: &AppState, payment_id: &str, message: &str) {
    let secret = state.config.shared_secret.clone();
    let result = state.ledger.transition(
        &secret,
        payment_id,
        PaymentStatus::Processing,
        PaymentStatus::Failed,
        |record| {
            record.error = Some(message.to_string());
        },
    );
    match result {
        Ok(()) => tracing::warn!(payment_id, error = message, "payment failed"),
        Err(err) => tracing::error!(payment_id, error = %err, "failed to mark payment failed"),
    }
}

/// Resumes unfinished payments at startup.
///
/// `processing` records with a transaction hash poll the chain until the
/// transfer confirms or times out; `processing` without a hash and all
/// `pending` records go back through the execution loop (their submit
/// attempt counter carries over, so crash loops still converge on
/// `failed`).
pub async fn recover(state: AppState) {
    let unfinished = state.ledger.unfinished();
    if unfinished.is_empty() {
        return;
    }
    tracing::info!(count = unfinished.len(), "recovering unfinished payments");
    for record in unfinished {
        let state = state.clone();
        let payment_id = record.payment_id.clone();
        state.tasks.clone().spawn(async move {
            match (record.status, record.tx_hash.clone()) {
                (PaymentStatus::Processing, Some(tx_hash)) => {
                    resume_submitted(&state, &payment_id, &tx_hash, record.requirement.network)
                        .await;
                }
                (PaymentStatus::Processing, None) => {
                    run_transfer_loop(&state, &payment_id).await;
                }
                (PaymentStatus::Pending, _) => {
                    execute(state.clone(), &payment_id).await;
                }
                _ => {}
            }
        });
    }
}

async fn resume_submitted(state: &AppState, payment_id: &str, tx_hash: &str, chain: apitoll_types::chain::Chain) {
    let secret = state.config.shared_secret.clone();
    let Some(executor) = state.executors.for_chain(chain) else {
        fail(state, payment_id, "no executor configured for recovery");
        return;
    };
    match executor.await_confirmation(tx_hash).await {
        Ok(outcome) => {
            let result = state.ledger.transition(
                &secret,
                payment_id,
                PaymentStatus::Processing,
                PaymentStatus::Completed,
                |record| {
                    record.block_number = outcome.block_number;
                },
            );
            if let Err(err) = result {
                tracing::error!(payment_id, error = %err, "failed to complete recovered payment");
            }
        }
        Err(err) => fail(state, payment_id, &err.to_string()),
    }
}
