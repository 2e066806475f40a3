//! Spend policy rules and their evaluation.
//!
//! Policies gate every outbound payment before a signature is produced. Each
//! rule is a typed variant; evaluation is pure over the proposed payment and
//! a [`SpendSnapshot`] the caller computes from a consistent view of the
//! agent's settled transactions, tallied in `requestedAt` order.
//!
//! Agent-scoped policies evaluate before organization-wide policies; the
//! first deny wins and nothing further runs.

use serde::{Deserialize, Serialize};

use crate::address::WalletAddress;
use crate::chain::Chain;
use crate::money::TokenAmount;

/// One spend policy rule. The variant tag is persisted alongside the
/// variant-specific fields; there is no untyped rule bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyRule {
    /// Caps on spend over rolling UTC-calendar windows and per transaction.
    Budget {
        #[serde(skip_serializing_if = "Option::is_none")]
        daily_limit: Option<TokenAmount>,
        #[serde(skip_serializing_if = "Option::is_none")]
        monthly_limit: Option<TokenAmount>,
        #[serde(skip_serializing_if = "Option::is_none")]
        per_transaction_limit: Option<TokenAmount>,
    },
    /// Seller wallet allow/block lists. The blocklist always wins; a
    /// non-empty allowlist requires membership, an empty one imposes nothing.
    VendorAcl {
        #[serde(default)]
        allowed_vendors: Vec<WalletAddress>,
        #[serde(default)]
        blocked_vendors: Vec<WalletAddress>,
    },
    /// Caps on outbound payment attempts per minute and per hour.
    RateLimit {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_per_minute: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_per_hour: Option<u32>,
    },
}

/// Where a policy is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    /// Attached to one agent. Evaluates first.
    Agent,
    /// Organization-wide default.
    Organization,
}

/// A policy as it applies to one evaluation: its scope plus the rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePolicy {
    pub scope: PolicyScope,
    pub rule: PolicyRule,
}

/// The payment an agent is about to make.
#[derive(Debug, Clone)]
pub struct ProposedPayment {
    pub seller: WalletAddress,
    pub amount: TokenAmount,
    pub chain: Chain,
    /// Endpoint path, for audit trails; not consulted by any rule today.
    pub endpoint: Option<String>,
}

/// Aggregates over the agent's history, computed by the caller from a
/// consistent snapshot of settled transactions and attempt logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpendSnapshot {
    /// Sum of settled amounts since UTC midnight.
    pub settled_today: TokenAmount,
    /// Sum of settled amounts since the first of the UTC month.
    pub settled_this_month: TokenAmount,
    /// Outbound payment attempts in the last minute.
    pub attempts_last_minute: u32,
    /// Outbound payment attempts in the last hour.
    pub attempts_last_hour: u32,
}

/// Why a payment was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    BudgetExceeded,
    VendorBlocked,
    NotInAllowlist,
    RateLimited,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::BudgetExceeded => "budget_exceeded",
            DenyReason::VendorBlocked => "vendor_blocked",
            DenyReason::NotInAllowlist => "not_in_allowlist",
            DenyReason::RateLimited => "rate_limited",
        };
        write!(f, "{s}")
    }
}

/// Outcome of evaluating all active policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(DenyReason),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

/// Evaluates `policies` against a proposed payment.
///
/// Policies are sorted agent-scope first (stable within scope), then applied
/// in order; the first deny short-circuits. A zero amount is always denied.
pub fn evaluate(
    policies: &[ActivePolicy],
    proposed: &ProposedPayment,
    spend: &SpendSnapshot,
) -> PolicyDecision {
    if proposed.amount.is_zero() {
        return PolicyDecision::Deny(DenyReason::BudgetExceeded);
    }
    let mut ordered: Vec<&ActivePolicy> = policies.iter().collect();
    ordered.sort_by_key(|p| p.scope);
    for policy in ordered {
        if let PolicyDecision::Deny(reason) = apply_rule(&policy.rule, proposed, spend) {
            return PolicyDecision::Deny(reason);
        }
    }
    PolicyDecision::Allow
}

fn apply_rule(
    rule: &PolicyRule,
    proposed: &ProposedPayment,
    spend: &SpendSnapshot,
) -> PolicyDecision {
    match rule {
        PolicyRule::Budget {
            daily_limit,
            monthly_limit,
            per_transaction_limit,
        } => {
            if let Some(cap) = per_transaction_limit {
                if proposed.amount > *cap {
                    return PolicyDecision::Deny(DenyReason::BudgetExceeded);
                }
            }
            if let Some(limit) = daily_limit {
                if exceeds(spend.settled_today, proposed.amount, *limit) {
                    return PolicyDecision::Deny(DenyReason::BudgetExceeded);
                }
            }
            if let Some(limit) = monthly_limit {
                if exceeds(spend.settled_this_month, proposed.amount, *limit) {
                    return PolicyDecision::Deny(DenyReason::BudgetExceeded);
                }
            }
            PolicyDecision::Allow
        }
        PolicyRule::VendorAcl {
            allowed_vendors,
            blocked_vendors,
        } => {
            // Blocked takes precedence over allowed.
            if blocked_vendors.contains(&proposed.seller) {
                return PolicyDecision::Deny(DenyReason::VendorBlocked);
            }
            if !allowed_vendors.is_empty() && !allowed_vendors.contains(&proposed.seller) {
                return PolicyDecision::Deny(DenyReason::NotInAllowlist);
            }
            PolicyDecision::Allow
        }
        PolicyRule::RateLimit {
            max_per_minute,
            max_per_hour,
        } => {
            if let Some(cap) = max_per_minute {
                if spend.attempts_last_minute >= *cap {
                    return PolicyDecision::Deny(DenyReason::RateLimited);
                }
            }
            if let Some(cap) = max_per_hour {
                if spend.attempts_last_hour >= *cap {
                    return PolicyDecision::Deny(DenyReason::RateLimited);
                }
            }
            PolicyDecision::Allow
        }
    }
}

/// `spent + amount > limit`, overflow-safe.
fn exceeds(spent: TokenAmount, amount: TokenAmount, limit: TokenAmount) -> bool {
    match spent.checked_add(amount) {
        Some(total) => total > limit,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seller() -> WalletAddress {
        WalletAddress::parse("0x71C7656EC7ab88b098defB751B7401B5f6d8976F").unwrap()
    }

    fn other_seller() -> WalletAddress {
        WalletAddress::parse("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045").unwrap()
    }

    fn proposed(amount: u64) -> ProposedPayment {
        ProposedPayment {
            seller: seller(),
            amount: TokenAmount(amount),
            chain: Chain::Base,
            endpoint: Some("/api/joke".to_string()),
        }
    }

    fn budget(daily: Option<u64>, monthly: Option<u64>, per_tx: Option<u64>) -> ActivePolicy {
        ActivePolicy {
            scope: PolicyScope::Agent,
            rule: PolicyRule::Budget {
                daily_limit: daily.map(TokenAmount),
                monthly_limit: monthly.map(TokenAmount),
                per_transaction_limit: per_tx.map(TokenAmount),
            },
        }
    }

    #[test]
    fn allows_within_budget() {
        let policies = [budget(Some(10_000), None, Some(10_000))];
        let spend = SpendSnapshot {
            settled_today: TokenAmount(4000),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&policies, &proposed(5000), &spend),
            PolicyDecision::Allow
        );
    }

    #[test]
    fn denies_when_daily_budget_would_be_exceeded() {
        // Settled today 0.008, limit 0.01, new attempt 0.005.
        let policies = [budget(Some(10_000), None, Some(10_000))];
        let spend = SpendSnapshot {
            settled_today: TokenAmount(8000),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&policies, &proposed(5000), &spend),
            PolicyDecision::Deny(DenyReason::BudgetExceeded)
        );
    }

    #[test]
    fn sum_exactly_at_limit_is_allowed() {
        let policies = [budget(Some(10_000), None, None)];
        let spend = SpendSnapshot {
            settled_today: TokenAmount(5000),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&policies, &proposed(5000), &spend),
            PolicyDecision::Allow
        );
    }

    #[test]
    fn denies_over_per_transaction_cap() {
        let policies = [budget(None, None, Some(1000))];
        assert_eq!(
            evaluate(&policies, &proposed(1001), &SpendSnapshot::default()),
            PolicyDecision::Deny(DenyReason::BudgetExceeded)
        );
    }

    #[test]
    fn denies_zero_amount() {
        assert_eq!(
            evaluate(&[], &proposed(0), &SpendSnapshot::default()),
            PolicyDecision::Deny(DenyReason::BudgetExceeded)
        );
    }

    #[test]
    fn blocklist_takes_precedence_over_allowlist() {
        let policies = [ActivePolicy {
            scope: PolicyScope::Agent,
            rule: PolicyRule::VendorAcl {
                allowed_vendors: vec![seller()],
                blocked_vendors: vec![seller()],
            },
        }];
        assert_eq!(
            evaluate(&policies, &proposed(100), &SpendSnapshot::default()),
            PolicyDecision::Deny(DenyReason::VendorBlocked)
        );
    }

    #[test]
    fn nonempty_allowlist_requires_membership() {
        let policies = [ActivePolicy {
            scope: PolicyScope::Agent,
            rule: PolicyRule::VendorAcl {
                allowed_vendors: vec![other_seller()],
                blocked_vendors: vec![],
            },
        }];
        assert_eq!(
            evaluate(&policies, &proposed(100), &SpendSnapshot::default()),
            PolicyDecision::Deny(DenyReason::NotInAllowlist)
        );
    }

    #[test]
    fn empty_allowlist_imposes_nothing() {
        let policies = [ActivePolicy {
            scope: PolicyScope::Organization,
            rule: PolicyRule::VendorAcl {
                allowed_vendors: vec![],
                blocked_vendors: vec![other_seller()],
            },
        }];
        assert_eq!(
            evaluate(&policies, &proposed(100), &SpendSnapshot::default()),
            PolicyDecision::Allow
        );
    }

    #[test]
    fn rate_limit_denies_at_cap() {
        let policies = [ActivePolicy {
            scope: PolicyScope::Agent,
            rule: PolicyRule::RateLimit {
                max_per_minute: Some(3),
                max_per_hour: None,
            },
        }];
        let spend = SpendSnapshot {
            attempts_last_minute: 3,
            ..Default::default()
        };
        assert_eq!(
            evaluate(&policies, &proposed(100), &spend),
            PolicyDecision::Deny(DenyReason::RateLimited)
        );
    }

    #[test]
    fn agent_scope_evaluates_before_org_scope() {
        // The org policy would deny with NotInAllowlist; the agent policy
        // denies first with RateLimited.
        let policies = [
            ActivePolicy {
                scope: PolicyScope::Organization,
                rule: PolicyRule::VendorAcl {
                    allowed_vendors: vec![other_seller()],
                    blocked_vendors: vec![],
                },
            },
            ActivePolicy {
                scope: PolicyScope::Agent,
                rule: PolicyRule::RateLimit {
                    max_per_minute: Some(0),
                    max_per_hour: None,
                },
            },
        ];
        assert_eq!(
            evaluate(&policies, &proposed(100), &SpendSnapshot::default()),
            PolicyDecision::Deny(DenyReason::RateLimited)
        );
    }

    #[test]
    fn rule_serde_is_tagged() {
        let rule = PolicyRule::Budget {
            daily_limit: Some(TokenAmount(10_000)),
            monthly_limit: None,
            per_transaction_limit: Some(TokenAmount(10_000)),
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["type"], "budget");
        assert_eq!(json["daily_limit"], "10000");
        let back: PolicyRule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }
}
