//! Stripe webhook reconciliation.
//!
//! Stripe is the system of record for plan subscriptions; the platform
//! never changes a plan outside of these events. Incoming webhook bodies
//! are authenticated with a constant-time HMAC-SHA256 check before any
//! JSON is parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use apitoll_store::document::IndexKey;
use apitoll_store::tables::{DepositStatus, Plan};
use apitoll_store::{Store, StoreError};

type HmacSha256 = Hmac<Sha256>;

/// Verifies the signature header against `HMAC-SHA256(body, secret)`.
///
/// The comparison is constant-time; a malformed hex signature fails like a
/// wrong one.
pub fn verify_signature(body: &[u8], signature_hex: &str, secret: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Computes the hex signature for a body (used by tests and internal
/// callers that need to self-sign).
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Maps a Stripe price id onto a plan.
pub fn map_price(price_id: &str) -> Plan {
    if price_id.contains("ent") {
        Plan::Enterprise
    } else if price_id.contains("pro") {
        Plan::Pro
    } else {
        Plan::Free
    }
}

/// What reconciliation did, for logging and follow-up actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    PlanActivated { plan: Plan },
    PlanDowngraded,
    DepositProcessing { deposit_id: String },
    Ignored { event_type: String },
    UnknownCustomer { customer: String },
}

/// Errors from reconciliation. Signature failures are handled by the
/// caller before this runs.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("event is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event is missing field {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Applies one verified Stripe event to the store.
pub fn reconcile(store: &Store, body: &[u8]) -> Result<ReconcileOutcome, ReconcileError> {
    let event: serde_json::Value = serde_json::from_slice(body)?;
    let event_type = event["type"].as_str().unwrap_or_default().to_string();
    match event_type.as_str() {
        "customer.subscription.created" | "customer.subscription.updated" => {
            activate_subscription(store, &event)
        }
        "customer.subscription.deleted" => downgrade(store, &event),
        "payment_intent.succeeded" => deposit_succeeded(store, &event),
        _ => Ok(ReconcileOutcome::Ignored { event_type }),
    }
}

fn activate_subscription(
    store: &Store,
    event: &serde_json::Value,
) -> Result<ReconcileOutcome, ReconcileError> {
    let object = &event["data"]["object"];
    let customer = object["customer"]
        .as_str()
        .ok_or(ReconcileError::MissingField("data.object.customer"))?
        .to_string();
    let subscription_id = object["id"].as_str().map(str::to_string);
    let price_id = object["items"]["data"][0]["price"]["id"]
        .as_str()
        .ok_or(ReconcileError::MissingField(
            "data.object.items.data[0].price.id",
        ))?
        .to_string();
    let period_end = object["current_period_end"]
        .as_u64()
        .ok_or(ReconcileError::MissingField("data.object.current_period_end"))?;
    let plan = map_price(&price_id);

    let outcome = store.mutate(|inner| {
        let Some((org_id, _)) = inner
            .organizations
            .by_index("by_stripe_customer", IndexKey::single(customer.clone()))
            .take(1)
            .collect()
            .into_iter()
            .next()
        else {
            return Ok(ReconcileOutcome::UnknownCustomer {
                customer: customer.clone(),
            });
        };
        inner.organizations.patch(&org_id, |org| {
            org.plan = plan;
            org.stripe_subscription_id = subscription_id.clone();
            org.stripe_price_id = Some(price_id.clone());
            org.billing_period_end = Some(period_end * 1000);
            Ok(())
        })?;
        Ok(ReconcileOutcome::PlanActivated { plan })
    })?;
    Ok(outcome)
}

fn downgrade(store: &Store, event: &serde_json::Value) -> Result<ReconcileOutcome, ReconcileError> {
    let customer = event["data"]["object"]["customer"]
        .as_str()
        .ok_or(ReconcileError::MissingField("data.object.customer"))?
        .to_string();
    let outcome = store.mutate(|inner| {
        let Some((org_id, _)) = inner
            .organizations
            .by_index("by_stripe_customer", IndexKey::single(customer.clone()))
            .take(1)
            .collect()
            .into_iter()
            .next()
        else {
            return Ok(ReconcileOutcome::UnknownCustomer {
                customer: customer.clone(),
            });
        };
        inner.organizations.patch(&org_id, |org| {
            org.plan = Plan::Free;
            org.stripe_subscription_id = None;
            org.stripe_price_id = None;
            org.billing_period_end = None;
            Ok(())
        })?;
        Ok(ReconcileOutcome::PlanDowngraded)
    })?;
    Ok(outcome)
}

fn deposit_succeeded(
    store: &Store,
    event: &serde_json::Value,
) -> Result<ReconcileOutcome, ReconcileError> {
    let intent = event["data"]["object"]["id"]
        .as_str()
        .ok_or(ReconcileError::MissingField("data.object.id"))?
        .to_string();
    let outcome = store.mutate(|inner| {
        let Some((deposit_id, deposit)) = inner
            .deposits
            .by_index("by_payment_intent", IndexKey::single(intent.clone()))
            .take(1)
            .collect()
            .into_iter()
            .next()
        else {
            return Ok(ReconcileOutcome::Ignored {
                event_type: "payment_intent.succeeded".to_string(),
            });
        };
        if deposit.status == DepositStatus::Pending {
            inner.deposits.patch(&deposit_id, |deposit| {
                deposit.status = DepositStatus::Processing;
                Ok(())
            })?;
        }
        Ok(ReconcileOutcome::DepositProcessing {
            deposit_id: deposit_id.to_string(),
        })
    })?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_store::tables::{DailyUsage, Organization};
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn org_with_customer(customer: &str) -> (Store, apitoll_store::Id<Organization>) {
        let store = Store::new();
        let id = store
            .mutate(|inner| {
                inner.insert_organization(Organization {
                    name: "acme".to_string(),
                    api_key: "sk-acme".to_string(),
                    plan: Plan::Free,
                    stripe_customer_id: Some(customer.to_string()),
                    stripe_subscription_id: None,
                    stripe_price_id: None,
                    billing_period_end: None,
                    daily_usage: DailyUsage {
                        date: "2026-03-15".to_string(),
                        count: 0,
                    },
                    owner_identity: None,
                    created_at: 1,
                })
            })
            .unwrap();
        (store, id)
    }

    #[test]
    fn signature_verification_is_exact() {
        let body = br#"{"type":"customer.subscription.updated"}"#;
        let signature = sign(body, SECRET);
        assert!(verify_signature(body, &signature, SECRET));
        assert!(!verify_signature(body, &signature, "whsec_other"));
        assert!(!verify_signature(b"tampered", &signature, SECRET));
        assert!(!verify_signature(body, "zz-not-hex", SECRET));
        assert!(!verify_signature(body, "", SECRET));
    }

    #[test]
    fn subscription_update_activates_plan() {
        let (store, id) = org_with_customer("cus_X");
        let event = json!({
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_123",
                "customer": "cus_X",
                "current_period_end": 1_800_000_000u64,
                "items": { "data": [ { "price": { "id": "price_pro_monthly" } } ] },
            }},
        });
        let outcome = reconcile(&store, event.to_string().as_bytes()).unwrap();
        assert_eq!(outcome, ReconcileOutcome::PlanActivated { plan: Plan::Pro });
        store.read(|inner| {
            let org = inner.organizations.get(&id).unwrap();
            assert_eq!(org.plan, Plan::Pro);
            assert_eq!(org.stripe_subscription_id.as_deref(), Some("sub_123"));
            assert_eq!(org.stripe_price_id.as_deref(), Some("price_pro_monthly"));
            assert_eq!(org.billing_period_end, Some(1_800_000_000_000));
        });
    }

    #[test]
    fn subscription_delete_downgrades_to_free() {
        let (store, id) = org_with_customer("cus_X");
        let upgrade = json!({
            "type": "customer.subscription.created",
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_X",
                "current_period_end": 1_800_000_000u64,
                "items": { "data": [ { "price": { "id": "price_enterprise_yearly" } } ] },
            }},
        });
        reconcile(&store, upgrade.to_string().as_bytes()).unwrap();
        store.read(|inner| {
            assert_eq!(inner.organizations.get(&id).unwrap().plan, Plan::Enterprise)
        });

        let delete = json!({
            "type": "customer.subscription.deleted",
            "data": { "object": { "customer": "cus_X" } },
        });
        let outcome = reconcile(&store, delete.to_string().as_bytes()).unwrap();
        assert_eq!(outcome, ReconcileOutcome::PlanDowngraded);
        store.read(|inner| {
            let org = inner.organizations.get(&id).unwrap();
            assert_eq!(org.plan, Plan::Free);
            assert!(org.stripe_subscription_id.is_none());
            assert!(org.billing_period_end.is_none());
        });
    }

    #[test]
    fn unknown_customer_is_reported_not_ignored() {
        let (store, _) = org_with_customer("cus_X");
        let event = json!({
            "type": "customer.subscription.updated",
            "data": { "object": {
                "id": "sub_1",
                "customer": "cus_UNKNOWN",
                "current_period_end": 1_800_000_000u64,
                "items": { "data": [ { "price": { "id": "price_pro" } } ] },
            }},
        });
        let outcome = reconcile(&store, event.to_string().as_bytes()).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::UnknownCustomer {
                customer: "cus_UNKNOWN".to_string()
            }
        );
    }

    #[test]
    fn price_mapping() {
        assert_eq!(map_price("price_enterprise_yearly"), Plan::Enterprise);
        assert_eq!(map_price("price_pro_monthly"), Plan::Pro);
        assert_eq!(map_price("price_hobby"), Plan::Free);
    }

    #[test]
    fn unhandled_events_are_ignored() {
        let store = Store::new();
        let outcome = reconcile(
            &store,
            br#"{"type":"invoice.finalized","data":{"object":{}}}"#,
        )
        .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Ignored {
                event_type: "invoice.finalized".to_string()
            }
        );
    }
}
