//! Plan limits and usage metering.
//!
//! Every authenticated platform request burns one unit of the
//! organization's daily budget. The counter lives on the organization
//! document keyed by the UTC day; crossing midnight resets it in the same
//! mutation that counts the request.

use apitoll_store::tables::{Organization, Plan};
use apitoll_store::{Id, Store, StoreError};
use apitoll_types::timestamp::day_key;

/// Per-plan ceilings. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub max_calls_per_day: Option<u32>,
    pub max_agents: Option<usize>,
    pub max_sellers: Option<usize>,
    /// Revenue/analytics retention window in days.
    pub retention_days: u64,
}

pub fn limits(plan: Plan) -> PlanLimits {
    match plan {
        Plan::Free => PlanLimits {
            max_calls_per_day: Some(1000),
            max_agents: Some(1),
            max_sellers: Some(2),
            retention_days: 7,
        },
        Plan::Pro => PlanLimits {
            max_calls_per_day: Some(100_000),
            max_agents: Some(10),
            max_sellers: Some(25),
            retention_days: 90,
        },
        Plan::Enterprise => PlanLimits {
            max_calls_per_day: None,
            max_agents: None,
            max_sellers: None,
            retention_days: 365,
        },
    }
}

/// Outcome of metering one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDecision {
    Allowed {
        /// Remaining budget today; `None` on unbounded plans.
        remaining: Option<u32>,
    },
    Denied {
        remaining: u32,
    },
}

impl UsageDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, UsageDecision::Allowed { .. })
    }
}

/// Meters one request against the org's daily budget.
///
/// The day-key comparison and the increment happen in one mutation; the
/// first request past UTC midnight resets the counter to 1.
pub fn increment_usage(
    store: &Store,
    org_id: &Id<Organization>,
    now_millis: u64,
) -> Result<UsageDecision, StoreError> {
    let today = day_key(now_millis);
    store.mutate(|inner| {
        let (plan, usage_date, usage_count) = {
            let org = inner
                .organizations
                .get(org_id)
                .ok_or_else(|| StoreError::NotFound {
                    table: "organizations",
                    id: org_id.to_string(),
                })?;
            (org.plan, org.daily_usage.date.clone(), org.daily_usage.count)
        };
        let limit = limits(plan).max_calls_per_day;
        let current = if usage_date == today { usage_count } else { 0 };

        if let Some(limit) = limit {
            if current >= limit {
                return Ok(UsageDecision::Denied {
                    remaining: limit.saturating_sub(current),
                });
            }
        }

        let next = current + 1;
        inner.organizations.patch(org_id, |org| {
            org.daily_usage.date = today.clone();
            org.daily_usage.count = next;
            Ok(())
        })?;
        Ok(UsageDecision::Allowed {
            remaining: limit.map(|limit| limit - next),
        })
    })
}

/// Whether the org can create another agent.
pub fn check_agent_limit(store: &Store, org_id: &Id<Organization>) -> Result<bool, StoreError> {
    store.read(|inner| {
        let org = inner
            .organizations
            .get(org_id)
            .ok_or_else(|| StoreError::NotFound {
                table: "organizations",
                id: org_id.to_string(),
            })?;
        Ok(match limits(org.plan).max_agents {
            Some(max) => inner.count_agents(org_id) < max,
            None => true,
        })
    })
}

/// Whether the org can create another seller.
pub fn check_seller_limit(store: &Store, org_id: &Id<Organization>) -> Result<bool, StoreError> {
    store.read(|inner| {
        let org = inner
            .organizations
            .get(org_id)
            .ok_or_else(|| StoreError::NotFound {
                table: "organizations",
                id: org_id.to_string(),
            })?;
        Ok(match limits(org.plan).max_sellers {
            Some(max) => inner.count_sellers(org_id) < max,
            None => true,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use apitoll_store::tables::DailyUsage;

    // 2026-03-15T17:45:30Z
    const NOW: u64 = 1_773_596_730_000;

    fn org_with_usage(plan: Plan, date: &str, count: u32) -> (Store, Id<Organization>) {
        let store = Store::new();
        let id = store
            .mutate(|inner| {
                inner.insert_organization(Organization {
                    name: "acme".to_string(),
                    api_key: "sk-acme".to_string(),
                    plan,
                    stripe_customer_id: None,
                    stripe_subscription_id: None,
                    stripe_price_id: None,
                    billing_period_end: None,
                    daily_usage: DailyUsage {
                        date: date.to_string(),
                        count,
                    },
                    owner_identity: None,
                    created_at: 1,
                })
            })
            .unwrap();
        (store, id)
    }

    #[test]
    fn free_plan_denies_at_one_thousand() {
        let (store, id) = org_with_usage(Plan::Free, "2026-03-15", 1000);
        let decision = increment_usage(&store, &id, NOW).unwrap();
        assert_eq!(decision, UsageDecision::Denied { remaining: 0 });
        // Denied requests do not consume budget.
        store.read(|inner| {
            assert_eq!(inner.organizations.get(&id).unwrap().daily_usage.count, 1000)
        });
    }

    #[test]
    fn counter_resets_at_utc_midnight() {
        let (store, id) = org_with_usage(Plan::Free, "2026-03-14", 1000);
        let decision = increment_usage(&store, &id, NOW).unwrap();
        assert_eq!(
            decision,
            UsageDecision::Allowed {
                remaining: Some(999)
            }
        );
        store.read(|inner| {
            let usage = &inner.organizations.get(&id).unwrap().daily_usage;
            assert_eq!(usage.date, "2026-03-15");
            assert_eq!(usage.count, 1);
        });
    }

    #[test]
    fn enterprise_is_unbounded() {
        let (store, id) = org_with_usage(Plan::Enterprise, "2026-03-15", 10_000_000);
        let decision = increment_usage(&store, &id, NOW).unwrap();
        assert_eq!(decision, UsageDecision::Allowed { remaining: None });
    }

    #[test]
    fn plan_gating_bounds_allowed_requests() {
        // At most `limit` requests in one day receive Allowed.
        let (store, id) = org_with_usage(Plan::Free, "2026-03-15", 995);
        let mut allowed = 0;
        for _ in 0..10 {
            if increment_usage(&store, &id, NOW).unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[test]
    fn agent_and_seller_limits_follow_plan() {
        let (store, id) = org_with_usage(Plan::Free, "2026-03-15", 0);
        assert!(check_agent_limit(&store, &id).unwrap());
        store
            .mutate(|inner| {
                inner.insert_agent(apitoll_store::tables::Agent {
                    org: id.clone(),
                    name: "bot".to_string(),
                    wallet: apitoll_types::address::WalletAddress::parse(
                        "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B",
                    )
                    .unwrap(),
                    chain: apitoll_types::chain::Chain::Base,
                    balance: apitoll_types::money::TokenAmount(0),
                    status: apitoll_store::tables::AgentStatus::Active,
                    policies: vec![],
                    created_at: 1,
                })
            })
            .unwrap();
        // Free plan allows exactly one agent.
        assert!(!check_agent_limit(&store, &id).unwrap());
        assert!(check_seller_limit(&store, &id).unwrap());
    }
}
