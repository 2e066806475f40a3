//! The store: one writer lock, snapshot reads, all-or-nothing mutations.

use std::sync::{Arc, RwLock};

use apitoll_types::policy::{ActivePolicy, PolicyScope};

use crate::document::{Document, IndexKey};
use crate::error::StoreError;
use crate::id::Id;
use crate::table::Table;
use crate::tables::{
    Agent, AlertRule, Deposit, Dispute, Endpoint, FacilitatorPayment, Organization,
    PlatformRevenue, Policy, RateLimitCounter, Seller, Tool, Transaction, Webhook,
    WebhookDelivery,
};

/// All tables. Cloneable so a mutation can run on a draft and commit by swap.
#[derive(Clone, Default)]
pub struct StoreInner {
    pub organizations: Table<Organization>,
    pub agents: Table<Agent>,
    pub sellers: Table<Seller>,
    pub endpoints: Table<Endpoint>,
    pub tools: Table<Tool>,
    pub transactions: Table<Transaction>,
    pub facilitator_payments: Table<FacilitatorPayment>,
    pub policies: Table<Policy>,
    pub alert_rules: Table<AlertRule>,
    pub disputes: Table<Dispute>,
    pub webhooks: Table<Webhook>,
    pub webhook_deliveries: Table<WebhookDelivery>,
    pub deposits: Table<Deposit>,
    pub platform_revenue: Table<PlatformRevenue>,
    pub rate_limits: Table<RateLimitCounter>,
}

fn require<T: Document>(table: &Table<T>, id: &Id<T>) -> Result<(), StoreError> {
    if table.get(id).is_none() {
        return Err(StoreError::MissingReference {
            table: T::TABLE,
            id: id.to_string(),
        });
    }
    Ok(())
}

impl StoreInner {
    pub fn insert_organization(&mut self, org: Organization) -> Result<Id<Organization>, StoreError> {
        self.organizations.insert(org)
    }

    pub fn insert_agent(&mut self, agent: Agent) -> Result<Id<Agent>, StoreError> {
        require(&self.organizations, &agent.org)?;
        self.agents.insert(agent)
    }

    pub fn insert_seller(&mut self, seller: Seller) -> Result<Id<Seller>, StoreError> {
        if let Some(org) = &seller.org {
            require(&self.organizations, org)?;
        }
        self.sellers.insert(seller)
    }

    pub fn insert_endpoint(&mut self, endpoint: Endpoint) -> Result<Id<Endpoint>, StoreError> {
        require(&self.sellers, &endpoint.seller)?;
        self.endpoints.insert(endpoint)
    }

    pub fn insert_tool(&mut self, tool: Tool) -> Result<Id<Tool>, StoreError> {
        require(&self.endpoints, &tool.endpoint)?;
        self.tools.insert(tool)
    }

    pub fn insert_transaction(&mut self, tx: Transaction) -> Result<Id<Transaction>, StoreError> {
        if let Some(agent) = &tx.agent {
            require(&self.agents, agent)?;
        }
        if let Some(seller) = &tx.seller {
            require(&self.sellers, seller)?;
        }
        if let Some(endpoint) = &tx.endpoint {
            require(&self.endpoints, endpoint)?;
        }
        self.transactions.insert(tx)
    }

    pub fn insert_policy(&mut self, policy: Policy) -> Result<Id<Policy>, StoreError> {
        require(&self.organizations, &policy.org)?;
        if let Some(agent) = &policy.agent {
            require(&self.agents, agent)?;
        }
        self.policies.insert(policy)
    }

    pub fn insert_alert_rule(&mut self, rule: AlertRule) -> Result<Id<AlertRule>, StoreError> {
        require(&self.organizations, &rule.org)?;
        self.alert_rules.insert(rule)
    }

    pub fn insert_dispute(&mut self, dispute: Dispute) -> Result<Id<Dispute>, StoreError> {
        require(&self.organizations, &dispute.org)?;
        require(&self.transactions, &dispute.transaction)?;
        self.disputes.insert(dispute)
    }

    pub fn insert_webhook(&mut self, webhook: Webhook) -> Result<Id<Webhook>, StoreError> {
        require(&self.organizations, &webhook.org)?;
        self.webhooks.insert(webhook)
    }

    pub fn insert_delivery(
        &mut self,
        delivery: WebhookDelivery,
    ) -> Result<Id<WebhookDelivery>, StoreError> {
        require(&self.webhooks, &delivery.webhook)?;
        self.webhook_deliveries.insert(delivery)
    }

    pub fn insert_deposit(&mut self, deposit: Deposit) -> Result<Id<Deposit>, StoreError> {
        require(&self.organizations, &deposit.org)?;
        self.deposits.insert(deposit)
    }

    pub fn insert_revenue(
        &mut self,
        revenue: PlatformRevenue,
    ) -> Result<Id<PlatformRevenue>, StoreError> {
        require(&self.transactions, &revenue.transaction)?;
        self.platform_revenue.insert(revenue)
    }

    /// Looks an organization up by its API key.
    pub fn org_by_api_key(&self, api_key: &str) -> Option<(Id<Organization>, Organization)> {
        self.organizations
            .unique_by_index("by_api_key", &IndexKey::single(api_key))
            .map(|(id, org)| (id, org.clone()))
    }

    /// The policies that apply to `agent` right now, agent-scoped first,
    /// one per (scope, rule type) with the latest created wins.
    pub fn effective_policies(
        &self,
        org: &Id<Organization>,
        agent: Option<&Id<Agent>>,
    ) -> Vec<ActivePolicy> {
        let mut out: Vec<(PolicyScope, &'static str, u64, ActivePolicy)> = Vec::new();
        let mut consider = |scope: PolicyScope, policy: &Policy| {
            if !policy.active {
                return;
            }
            let rule_type = policy.rule_type();
            let candidate = ActivePolicy {
                scope,
                rule: policy.rule.clone(),
            };
            match out
                .iter_mut()
                .find(|(s, t, _, _)| *s == scope && *t == rule_type)
            {
                Some(existing) if existing.2 < policy.created_at => {
                    *existing = (scope, rule_type, policy.created_at, candidate);
                }
                Some(_) => {}
                None => out.push((scope, rule_type, policy.created_at, candidate)),
            }
        };
        if let Some(agent) = agent {
            for (_, policy) in self
                .policies
                .by_index("by_agent", IndexKey::single(agent.to_string()))
                .collect()
            {
                consider(PolicyScope::Agent, &policy);
            }
        }
        for (_, policy) in self
            .policies
            .by_index("by_org", IndexKey::single(org.to_string()))
            .collect()
        {
            // Org-wide means not attached to any agent.
            if policy.agent.is_none() {
                consider(PolicyScope::Organization, &policy);
            }
        }
        out.sort_by_key(|(scope, _, _, _)| *scope);
        out.into_iter().map(|(_, _, _, policy)| policy).collect()
    }

    /// Ranked text search over active tools, optionally filtered by category.
    ///
    /// Scoring is term hits over name, description and tags, weighted by the
    /// tool's boost score, verified listings first. Bounded by `limit`.
    pub fn search_tools(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Vec<(Id<Tool>, Tool)> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        let mut scored: Vec<(i64, Id<Tool>, Tool)> = self
            .tools
            .iter()
            .filter(|(_, tool)| tool.active)
            .filter(|(_, tool)| category.is_none_or(|c| tool.category == c))
            .filter_map(|(id, tool)| {
                let haystack = format!(
                    "{} {} {}",
                    tool.name.to_lowercase(),
                    tool.description.to_lowercase(),
                    tool.tags.join(" ").to_lowercase()
                );
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                if hits == 0 && !terms.is_empty() {
                    return None;
                }
                let mut score = hits as i64 * 100 + tool.boost_score;
                if tool.verified {
                    score += 50;
                }
                Some((score, id.clone(), tool.clone()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, id, tool)| (id, tool))
            .collect()
    }

    /// Removes rate-limit counters whose window ended before `cutoff_millis`.
    /// Returns the number of pruned counters.
    pub fn prune_rate_limits(&mut self, cutoff_millis: u64) -> usize {
        let expired: Vec<Id<RateLimitCounter>> = self
            .rate_limits
            .iter()
            .filter(|(_, counter)| counter.window_start < cutoff_millis)
            .map(|(id, _)| id.clone())
            .collect();
        let pruned = expired.len();
        for id in expired {
            let _ = self.rate_limits.remove(&id);
        }
        pruned
    }

    /// Collection counts used by plan gating.
    pub fn count_agents(&self, org: &Id<Organization>) -> usize {
        self.agents
            .by_index("by_org", IndexKey::single(org.to_string()))
            .count()
    }

    pub fn count_sellers(&self, org: &Id<Organization>) -> usize {
        self.sellers
            .by_index("by_org", IndexKey::single(org.to_string()))
            .count()
    }
}

/// Handle shared across tasks. Cheap to clone.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    /// Runs `f` on a consistent snapshot of the committed state.
    pub fn read<R>(&self, f: impl FnOnce(&StoreInner) -> R) -> R {
        let guard = self.inner.read().expect("store lock poisoned");
        f(&guard)
    }

    /// Runs `f` on a draft of the committed state and commits the draft only
    /// if `f` returns `Ok`. An error leaves the store exactly as it was.
    pub fn mutate<R>(
        &self,
        f: impl FnOnce(&mut StoreInner) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.inner.write().expect("store lock poisoned");
        let mut draft = guard.clone();
        let result = f(&mut draft)?;
        *guard = draft;
        Ok(result)
    }
}
