//! The platform's tables: documents, status enums and index declarations.
//!
//! Ids are opaque and foreign keys are invalid to mutate after insert; the
//! insert helpers on [`StoreInner`](crate::store::StoreInner) verify that
//! referenced documents exist. Status enums own their legal transitions.

use serde::{Deserialize, Serialize};

use apitoll_types::address::WalletAddress;
use apitoll_types::chain::Chain;
pub use apitoll_types::facilitator::PaymentStatus;
use apitoll_types::money::{MoneyAmount, TokenAmount};
use apitoll_types::policy::PolicyRule;
use apitoll_types::proto::PaymentRequirement;

use crate::document::{Document, IndexEntry, IndexKey};
use crate::id::Id;

/// Subscription plan of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

/// Daily usage counter: the UTC day key and the number of calls so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: String,
    pub count: u32,
}

/// A tenant. Owns agents, sellers, policies, webhooks, deposits, alert rules
/// and disputes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub name: String,
    pub api_key: String,
    pub plan: Plan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_price_id: Option<String>,
    /// Milliseconds since epoch; end of the current billing period.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_period_end: Option<u64>,
    pub daily_usage: DailyUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_identity: Option<String>,
    pub created_at: u64,
}

impl Document for Organization {
    const TABLE: &'static str = "organizations";
    const ID_PREFIX: &'static str = "org";

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![IndexEntry::unique(
            "by_api_key",
            IndexKey::single(self.api_key.clone()),
        )];
        if let Some(customer) = &self.stripe_customer_id {
            entries.push(IndexEntry::new(
                "by_stripe_customer",
                IndexKey::single(customer.clone()),
            ));
        }
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Paused,
    Depleted,
}

/// A buyer wallet operated by an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub org: Id<Organization>,
    pub name: String,
    pub wallet: WalletAddress,
    pub chain: Chain,
    pub balance: TokenAmount,
    pub status: AgentStatus,
    /// Attached policies, in evaluation order.
    pub policies: Vec<Id<Policy>>,
    pub created_at: u64,
}

impl Document for Agent {
    const TABLE: &'static str = "agents";
    const ID_PREFIX: &'static str = "agt";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![
            IndexEntry::new("by_org", IndexKey::single(self.org.to_string())),
            IndexEntry::new("by_wallet", IndexKey::single(self.wallet.to_string())),
        ]
    }
}

/// A seller account. May exist without an organization (self-serve API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seller {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<Id<Organization>>,
    pub name: String,
    pub wallet: WalletAddress,
    pub api_key: String,
    pub created_at: u64,
}

impl Document for Seller {
    const TABLE: &'static str = "sellers";
    const ID_PREFIX: &'static str = "slr";

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![IndexEntry::unique(
            "by_api_key",
            IndexKey::single(self.api_key.clone()),
        )];
        if let Some(org) = &self.org {
            entries.push(IndexEntry::new("by_org", IndexKey::single(org.to_string())));
        }
        entries
    }
}

/// A paid route on a seller's API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub seller: Id<Seller>,
    pub method: String,
    /// Path pattern; `:param` segments match any single segment.
    pub path: String,
    pub price: MoneyAmount,
    pub currency: String,
    pub chains: Vec<Chain>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub active: bool,
    pub total_calls: u64,
    pub total_revenue: TokenAmount,
    pub created_at: u64,
}

impl Document for Endpoint {
    const TABLE: &'static str = "endpoints";
    const ID_PREFIX: &'static str = "ept";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            "by_seller",
            IndexKey::single(self.seller.to_string()),
        )]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingTier {
    Standard,
    Featured,
    Premium,
}

/// Discovery listing for an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub endpoint: Id<Endpoint>,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub verified: bool,
    pub listing_tier: ListingTier,
    pub boost_score: i64,
    pub rating_sum: u64,
    pub rating_count: u64,
    pub active: bool,
    pub created_at: u64,
}

impl Document for Tool {
    const TABLE: &'static str = "tools";
    const ID_PREFIX: &'static str = "tol";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![
            IndexEntry::unique("by_slug", IndexKey::single(self.slug.clone())),
            IndexEntry::new("by_category", IndexKey::single(self.category.clone())),
            IndexEntry::new(
                "by_active",
                IndexKey::single(if self.active { "1" } else { "0" }),
            ),
            IndexEntry::new(
                "by_featured",
                IndexKey::single(match self.listing_tier {
                    ListingTier::Standard => "0",
                    ListingTier::Featured | ListingTier::Premium => "1",
                }),
            ),
        ]
    }
}

/// Lifecycle of a paid call attempt. Settled and failed rows are immutable
/// except for the refund step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Settled,
    Failed,
    Refunded,
}

impl TxStatus {
    pub fn can_transition(self, to: TxStatus) -> bool {
        matches!(
            (self, to),
            (TxStatus::Pending, TxStatus::Settled)
                | (TxStatus::Pending, TxStatus::Failed)
                | (TxStatus::Settled, TxStatus::Refunded)
                | (TxStatus::Failed, TxStatus::Refunded)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Settled => "settled",
            TxStatus::Failed => "failed",
            TxStatus::Refunded => "refunded",
        }
    }
}

/// Fee split recorded on a transaction, in smallest units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSplit {
    pub platform_fee: TokenAmount,
    pub seller_amount: TokenAmount,
    pub fee_bps: u16,
}

/// One paid call attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub agent_address: WalletAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<Id<Agent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller: Option<Id<Seller>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Id<Endpoint>>,
    pub path: String,
    pub method: String,
    pub amount: TokenAmount,
    pub chain: Chain,
    pub status: TxStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub requested_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub split: TxSplit,
}

impl Document for Transaction {
    const TABLE: &'static str = "transactions";
    const ID_PREFIX: &'static str = "txn";

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![
            IndexEntry::new("by_status", IndexKey::single(self.status.as_str())),
            IndexEntry::new(
                "by_chain",
                IndexKey::single(self.chain.caip2()).part_u64(self.requested_at),
            ),
            IndexEntry::new(
                "by_agent_address",
                IndexKey::single(self.agent_address.to_string()).part_u64(self.requested_at),
            ),
        ];
        if let Some(agent) = &self.agent {
            entries.push(IndexEntry::new(
                "by_agent",
                IndexKey::single(agent.to_string()).part_u64(self.requested_at),
            ));
        }
        if let Some(seller) = &self.seller {
            entries.push(IndexEntry::new(
                "by_seller",
                IndexKey::single(seller.to_string()).part_u64(self.requested_at),
            ));
        }
        if let Some(tx_hash) = &self.tx_hash {
            entries.push(IndexEntry::new(
                "by_tx_hash",
                IndexKey::single(tx_hash.clone()),
            ));
        }
        entries
    }
}

/// The captured original request a facilitator payment will replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// One relay through the facilitator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorPayment {
    pub payment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub original: CapturedRequest,
    pub requirement: PaymentRequirement,
    pub agent_wallet: WalletAddress,
    pub seller_address: WalletAddress,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub submit_attempts: u32,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

impl Document for FacilitatorPayment {
    const TABLE: &'static str = "facilitatorPayments";
    const ID_PREFIX: &'static str = "pay";

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![
            IndexEntry::unique("by_payment_id", IndexKey::single(self.payment_id.clone())),
            IndexEntry::new("by_status", IndexKey::single(self.status.as_str())),
        ];
        if let Some(key) = &self.idempotency_key {
            entries.push(IndexEntry::unique(
                "by_idempotency_key",
                IndexKey::single(key.clone()),
            ));
        }
        entries
    }
}

/// A stored spend policy. Agent-scoped when `agent` is set, otherwise
/// organization-wide. One effective policy per (scope, rule type); the
/// latest wins, resolved at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub org: Id<Organization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<Id<Agent>>,
    pub rule: PolicyRule,
    pub active: bool,
    pub created_at: u64,
}

impl Policy {
    /// Discriminant used for latest-wins resolution.
    pub fn rule_type(&self) -> &'static str {
        match self.rule {
            PolicyRule::Budget { .. } => "budget",
            PolicyRule::VendorAcl { .. } => "vendor_acl",
            PolicyRule::RateLimit { .. } => "rate_limit",
        }
    }
}

impl Document for Policy {
    const TABLE: &'static str = "policies";
    const ID_PREFIX: &'static str = "pol";

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![IndexEntry::new(
            "by_org",
            IndexKey::single(self.org.to_string()),
        )];
        if let Some(agent) = &self.agent {
            entries.push(IndexEntry::new(
                "by_agent",
                IndexKey::single(agent.to_string()),
            ));
        }
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    DailySpend,
    FailureRate,
    AgentBalance,
}

/// A configured alert. Evaluation is outside the core; this is storage only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    pub org: Id<Organization>,
    pub name: String,
    pub metric: AlertMetric,
    pub threshold: MoneyAmount,
    pub active: bool,
    pub created_at: u64,
}

impl Document for AlertRule {
    const TABLE: &'static str = "alertRules";
    const ID_PREFIX: &'static str = "alr";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            "by_org",
            IndexKey::single(self.org.to_string()).part_u64(self.created_at),
        )]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    Open,
    Resolved,
    Rejected,
}

/// A dispute raised by an organization over one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub org: Id<Organization>,
    pub transaction: Id<Transaction>,
    pub reason: String,
    pub status: DisputeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub opened_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
}

impl Document for Dispute {
    const TABLE: &'static str = "disputes";
    const ID_PREFIX: &'static str = "dsp";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            "by_org",
            IndexKey::single(self.org.to_string()).part_u64(self.opened_at),
        )]
    }
}

/// The closed set of webhook event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookEventType {
    #[serde(rename = "payment.completed")]
    PaymentCompleted,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "dispute.opened")]
    DisputeOpened,
    #[serde(rename = "dispute.resolved")]
    DisputeResolved,
    #[serde(rename = "agent.depleted")]
    AgentDepleted,
    #[serde(rename = "seller.payout")]
    SellerPayout,
    #[serde(rename = "tool.registered")]
    ToolRegistered,
    #[serde(rename = "tool.updated")]
    ToolUpdated,
    #[serde(rename = "test.ping")]
    TestPing,
}

impl WebhookEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEventType::PaymentCompleted => "payment.completed",
            WebhookEventType::PaymentFailed => "payment.failed",
            WebhookEventType::DisputeOpened => "dispute.opened",
            WebhookEventType::DisputeResolved => "dispute.resolved",
            WebhookEventType::AgentDepleted => "agent.depleted",
            WebhookEventType::SellerPayout => "seller.payout",
            WebhookEventType::ToolRegistered => "tool.registered",
            WebhookEventType::ToolUpdated => "tool.updated",
            WebhookEventType::TestPing => "test.ping",
        }
    }
}

/// A registered webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub org: Id<Organization>,
    pub url: String,
    pub events: Vec<WebhookEventType>,
    pub secret: String,
    pub enabled: bool,
    /// Terminal delivery failures since the last success.
    pub failure_count: u32,
    pub created_at: u64,
}

impl Webhook {
    /// Flagged in UIs once three deliveries have failed terminally; the
    /// webhook stays enabled.
    pub fn is_failing(&self) -> bool {
        self.failure_count >= 3
    }
}

impl Document for Webhook {
    const TABLE: &'static str = "webhooks";
    const ID_PREFIX: &'static str = "whk";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            "by_org",
            IndexKey::single(self.org.to_string()),
        )]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// One webhook event queued for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub webhook: Id<Webhook>,
    pub event: WebhookEventType,
    pub payload: serde_json::Value,
    /// Unique id sent as `X-Webhook-Id`; consumers dedupe on it.
    pub delivery_id: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    /// Milliseconds since epoch; the delivery is due when this has passed.
    pub next_attempt_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
    pub created_at: u64,
}

impl Document for WebhookDelivery {
    const TABLE: &'static str = "webhookDeliveries";
    const ID_PREFIX: &'static str = "dlv";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![
            IndexEntry::new(
                "by_webhook",
                IndexKey::single(self.webhook.to_string()).part_u64(self.created_at),
            ),
            IndexEntry::new(
                "by_status",
                IndexKey::single(self.status.as_str()).part_u64(self.next_attempt_at),
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A fiat deposit that tops up an agent wallet with USDC once Stripe
/// confirms the card payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub org: Id<Organization>,
    pub amount_usd: MoneyAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_payment_intent: Option<String>,
    pub status: DepositStatus,
    pub chain: Chain,
    pub destination: WalletAddress,
    pub created_at: u64,
}

impl Document for Deposit {
    const TABLE: &'static str = "deposits";
    const ID_PREFIX: &'static str = "dep";

    fn index_entries(&self) -> Vec<IndexEntry> {
        let mut entries = vec![IndexEntry::new(
            "by_org",
            IndexKey::single(self.org.to_string()).part_u64(self.created_at),
        )];
        if let Some(intent) = &self.stripe_payment_intent {
            entries.push(IndexEntry::new(
                "by_payment_intent",
                IndexKey::single(intent.clone()),
            ));
        }
        entries
    }
}

/// The platform's share of one settled transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformRevenue {
    pub transaction: Id<Transaction>,
    pub amount: TokenAmount,
    pub chain: Chain,
    pub fee_bps: u16,
    pub collected_at: u64,
}

impl Document for PlatformRevenue {
    const TABLE: &'static str = "platformRevenue";
    const ID_PREFIX: &'static str = "rev";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![
            IndexEntry::new("by_collected_at", IndexKey::new().part_u64(self.collected_at)),
            IndexEntry::new(
                "by_chain",
                IndexKey::single(self.chain.caip2()).part_u64(self.collected_at),
            ),
        ]
    }
}

/// Sliding-window rate limit counter, TTL-pruned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCounter {
    pub key: String,
    /// Milliseconds since epoch, aligned to the window.
    pub window_start: u64,
    pub count: u32,
}

impl Document for RateLimitCounter {
    const TABLE: &'static str = "rateLimits";
    const ID_PREFIX: &'static str = "rlc";

    fn index_entries(&self) -> Vec<IndexEntry> {
        vec![
            IndexEntry::unique(
                "by_key_window",
                IndexKey::single(self.key.clone()).part_u64(self.window_start),
            ),
            IndexEntry::new("by_window", IndexKey::new().part_u64(self.window_start)),
        ]
    }
}
