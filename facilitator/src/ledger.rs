//! Secret-guarded payment persistence.
//!
//! Every mutating method takes the shared secret and compares it in
//! constant time before touching the store; there is no mutation path that
//! skips the check. Status transitions are compare-and-set on the record's
//! prior status inside a single store mutation, which is what makes them
//! linearizable per payment.

use uuid::Uuid;

use apitoll_store::document::{IndexKey, Order};
use apitoll_store::tables::{CapturedRequest, FacilitatorPayment, PaymentStatus};
use apitoll_store::{Document, Id, Store, StoreError};
use apitoll_types::facilitator::{PayRequest, PaymentView};
use apitoll_types::timestamp::now_millis;

use crate::guard::secrets_match;

/// Errors from the payment ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid shared secret")]
    Unauthorized,
    #[error("payment {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a `/pay` intake.
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub payment_id: String,
    pub status: PaymentStatus,
    /// False when an existing record was returned instead of a new one
    /// being created; nothing is scheduled in that case.
    pub created: bool,
}

/// The facilitator's guarded view of the payment table.
#[derive(Clone)]
pub struct PaymentLedger {
    store: Store,
    shared_secret: String,
}

impl PaymentLedger {
    pub fn new(store: Store, shared_secret: impl Into<String>) -> Self {
        PaymentLedger {
            store,
            shared_secret: shared_secret.into(),
        }
    }

    fn authorize(&self, secret: &str) -> Result<(), LedgerError> {
        if secrets_match(secret, &self.shared_secret) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized)
        }
    }

    /// Idempotent intake:
    ///
    /// 1. A known `idempotency_key` returns the stored record untouched.
    /// 2. A colliding caller-supplied `payment_id` returns the stored
    ///    record; the captured original request never changes after the
    ///    first insert.
    /// 3. Otherwise a fresh record is inserted as `pending`.
    pub fn intake(&self, secret: &str, request: &PayRequest) -> Result<IntakeOutcome, LedgerError> {
        self.authorize(secret)?;
        let outcome = self.store.mutate(|inner| {
            if let Some(key) = &request.idempotency_key {
                if let Some((_, existing)) = inner
                    .facilitator_payments
                    .unique_by_index("by_idempotency_key", &IndexKey::single(key.clone()))
                {
                    return Ok(IntakeOutcome {
                        payment_id: existing.payment_id.clone(),
                        status: existing.status,
                        created: false,
                    });
                }
            }
            if let Some(payment_id) = &request.payment_id {
                if let Some((_, existing)) = inner
                    .facilitator_payments
                    .unique_by_index("by_payment_id", &IndexKey::single(payment_id.clone()))
                {
                    return Ok(IntakeOutcome {
                        payment_id: existing.payment_id.clone(),
                        status: existing.status,
                        created: false,
                    });
                }
            }
            let payment_id = request
                .payment_id
                .clone()
                .unwrap_or_else(|| format!("pay_{}", Uuid::new_v4().simple()));
            let record = FacilitatorPayment {
                payment_id: payment_id.clone(),
                idempotency_key: request.idempotency_key.clone(),
                original: CapturedRequest {
                    url: request.original_url.clone(),
                    method: request.original_method.clone(),
                    headers: request.original_headers.clone(),
                    body: request.original_body.clone(),
                },
                requirement: request.payment_required.clone(),
                agent_wallet: request.agent_wallet.clone(),
                seller_address: request.payment_required.pay_to.clone(),
                status: PaymentStatus::Pending,
                tx_hash: None,
                block_number: None,
                error: None,
                submit_attempts: 0,
                created_at: now_millis(),
                completed_at: None,
            };
            inner.facilitator_payments.insert(record)?;
            Ok(IntakeOutcome {
                payment_id,
                status: PaymentStatus::Pending,
                created: true,
            })
        })?;
        Ok(outcome)
    }

    /// Compare-and-set transition from `expected` with an update applied to
    /// the record in the same mutation.
    pub fn transition(
        &self,
        secret: &str,
        payment_id: &str,
        expected: PaymentStatus,
        to: PaymentStatus,
        update: impl FnOnce(&mut FacilitatorPayment),
    ) -> Result<(), LedgerError> {
        self.authorize(secret)?;
        let payment_id_owned = payment_id.to_string();
        self.store.mutate(move |inner| {
            let (id, current) = find(inner, &payment_id_owned)?;
            if current.status != expected {
                return Err(StoreError::InvalidTransition {
                    table: FacilitatorPayment::TABLE,
                    from: current.status.as_str().to_string(),
                    to: to.as_str().to_string(),
                });
            }
            if !current.status.can_transition(to) {
                return Err(StoreError::InvalidTransition {
                    table: FacilitatorPayment::TABLE,
                    from: current.status.as_str().to_string(),
                    to: to.as_str().to_string(),
                });
            }
            inner.facilitator_payments.patch(&id, |record| {
                record.status = to;
                if to.is_terminal() {
                    record.completed_at = Some(now_millis());
                }
                update(record);
                Ok(())
            })
        })?;
        Ok(())
    }

    /// Counts one submit attempt; used by retry accounting.
    pub fn record_submit_attempt(&self, secret: &str, payment_id: &str) -> Result<u32, LedgerError> {
        self.authorize(secret)?;
        let payment_id_owned = payment_id.to_string();
        let attempts = self.store.mutate(move |inner| {
            let (id, _) = find(inner, &payment_id_owned)?;
            let mut attempts = 0;
            inner.facilitator_payments.patch(&id, |record| {
                record.submit_attempts += 1;
                attempts = record.submit_attempts;
                Ok(())
            })?;
            Ok(attempts)
        })?;
        Ok(attempts)
    }

    /// Reads one payment (no secret: reads are not mutations).
    pub fn get(&self, payment_id: &str) -> Option<FacilitatorPayment> {
        self.store.read(|inner| {
            inner
                .facilitator_payments
                .unique_by_index("by_payment_id", &IndexKey::single(payment_id))
                .map(|(_, record)| record.clone())
        })
    }

    /// All payments still in flight, oldest first; used by startup recovery.
    pub fn unfinished(&self) -> Vec<FacilitatorPayment> {
        self.store.read(|inner| {
            let mut records: Vec<FacilitatorPayment> = inner
                .facilitator_payments
                .by_index("by_status", IndexKey::single(PaymentStatus::Pending.as_str()))
                .order(Order::Asc)
                .collect()
                .into_iter()
                .chain(
                    inner
                        .facilitator_payments
                        .by_index(
                            "by_status",
                            IndexKey::single(PaymentStatus::Processing.as_str()),
                        )
                        .order(Order::Asc)
                        .collect(),
                )
                .map(|(_, record)| record)
                .collect();
            records.sort_by_key(|record| record.created_at);
            records
        })
    }
}

fn find(
    inner: &apitoll_store::StoreInner,
    payment_id: &str,
) -> Result<(Id<FacilitatorPayment>, FacilitatorPayment), StoreError> {
    inner
        .facilitator_payments
        .unique_by_index("by_payment_id", &IndexKey::single(payment_id))
        .map(|(id, record)| (id, record.clone()))
        .ok_or_else(|| StoreError::NotFound {
            table: FacilitatorPayment::TABLE,
            id: payment_id.to_string(),
        })
}

/// Renders the public view of a payment record.
pub fn view(record: &FacilitatorPayment) -> PaymentView {
    PaymentView {
        payment_id: record.payment_id.clone(),
        status: record.status,
        tx_hash: record.tx_hash.clone(),
        block_number: record.block_number,
        error: record.error.clone(),
        created_at: record.created_at,
        completed_at: record.completed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_types::address::WalletAddress;
    use apitoll_types::chain::Chain;
    use apitoll_types::money::TokenAmount;
    use apitoll_types::proto::{
        EvmSignature, HexEncodedNonce, PaymentAuthorization, PaymentRequirement,
    };
    use apitoll_types::timestamp::UnixTimestamp;

    const SECRET: &str = "shared-secret";

    fn ledger() -> PaymentLedger {
        PaymentLedger::new(Store::new(), SECRET)
    }

    fn pay_request(key: Option<&str>) -> PayRequest {
        let seller =
            WalletAddress::parse("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").unwrap();
        let agent = WalletAddress::parse("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B").unwrap();
        let requirement = PaymentRequirement::for_chains(
            &[Chain::Base],
            TokenAmount(5000),
            &seller,
            "GET /api/joke",
            None,
        )
        .remove(0);
        PayRequest {
            original_url: "https://api.example/joke".to_string(),
            original_method: "GET".to_string(),
            original_headers: vec![],
            original_body: None,
            payment_required: requirement,
            agent_wallet: agent.clone(),
            agent_auth: PaymentAuthorization {
                network: Chain::Base,
                from: agent,
                to: seller,
                value: TokenAmount(5000),
                valid_after: UnixTimestamp::from_secs(0),
                valid_before: UnixTimestamp::from_secs(u32::MAX as u64),
                nonce: HexEncodedNonce([9u8; 32]),
                signature: EvmSignature([1u8; 65]),
            },
            payment_id: None,
            idempotency_key: key.map(str::to_string),
        }
    }

    #[test]
    fn rejects_wrong_secret() {
        let ledger = ledger();
        let err = ledger.intake("wrong", &pay_request(None)).unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized));
    }

    #[test]
    fn same_idempotency_key_yields_one_record() {
        let ledger = ledger();
        let first = ledger.intake(SECRET, &pay_request(Some("k-1"))).unwrap();
        assert!(first.created);
        let second = ledger.intake(SECRET, &pay_request(Some("k-1"))).unwrap();
        assert!(!second.created);
        assert_eq!(first.payment_id, second.payment_id);

        // The stored original is the first call's, untouched.
        let record = ledger.get(&first.payment_id).unwrap();
        assert_eq!(record.original.url, "https://api.example/joke");
        assert_eq!(record.original.method, "GET");
    }

    #[test]
    fn colliding_payment_id_never_rewrites_original() {
        let ledger = ledger();
        let mut request = pay_request(None);
        request.payment_id = Some("pay_fixed".to_string());
        let first = ledger.intake(SECRET, &request).unwrap();
        assert!(first.created);

        let mut retry = pay_request(None);
        retry.payment_id = Some("pay_fixed".to_string());
        retry.original_url = "https://evil.example/other".to_string();
        let second = ledger.intake(SECRET, &retry).unwrap();
        assert!(!second.created);

        let record = ledger.get("pay_fixed").unwrap();
        assert_eq!(record.original.url, "https://api.example/joke");
    }

    #[test]
    fn transitions_are_cas_and_monotonic() {
        let ledger = ledger();
        let outcome = ledger.intake(SECRET, &pay_request(None)).unwrap();
        let id = outcome.payment_id;

        ledger
            .transition(SECRET, &id, PaymentStatus::Pending, PaymentStatus::Processing, |_| {})
            .unwrap();
        // A second worker racing the same transition loses.
        assert!(
            ledger
                .transition(SECRET, &id, PaymentStatus::Pending, PaymentStatus::Processing, |_| {})
                .is_err()
        );
        ledger
            .transition(
                SECRET,
                &id,
                PaymentStatus::Processing,
                PaymentStatus::Completed,
                |record| {
                    record.tx_hash = Some("0xabc".to_string());
                    record.block_number = Some(123);
                },
            )
            .unwrap();
        // Terminal states never move again.
        assert!(
            ledger
                .transition(SECRET, &id, PaymentStatus::Completed, PaymentStatus::Failed, |_| {})
                .is_err()
        );

        let record = ledger.get(&id).unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.tx_hash.as_deref(), Some("0xabc"));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn unfinished_lists_pending_and_processing() {
        let ledger = ledger();
        let a = ledger.intake(SECRET, &pay_request(Some("k-a"))).unwrap();
        let b = ledger.intake(SECRET, &pay_request(Some("k-b"))).unwrap();
        let c = ledger.intake(SECRET, &pay_request(Some("k-c"))).unwrap();
        ledger
            .transition(SECRET, &b.payment_id, PaymentStatus::Pending, PaymentStatus::Processing, |_| {})
            .unwrap();
        ledger
            .transition(SECRET, &c.payment_id, PaymentStatus::Pending, PaymentStatus::Failed, |record| {
                record.error = Some("validation".to_string());
            })
            .unwrap();

        let unfinished = ledger.unfinished();
        let ids: Vec<&str> = unfinished.iter().map(|r| r.payment_id.as_str()).collect();
        assert!(ids.contains(&a.payment_id.as_str()));
        assert!(ids.contains(&b.payment_id.as_str()));
        assert!(!ids.contains(&c.payment_id.as_str()));
    }
}
