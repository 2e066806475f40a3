//! Facilitator API wire types.
//!
//! The facilitator exposes `POST /pay`, `GET /pay/{id}`, `POST /forward/{id}`
//! and `POST /verify`. These are the request and response bodies shared by
//! the service and its clients. Field names are snake_case on this API.

use serde::{Deserialize, Serialize};

use crate::address::WalletAddress;
use crate::proto::{PaymentAuthorization, PaymentRequirement};

/// Lifecycle of one facilitator relay. Transitions are monotonic;
/// `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn can_transition(self, to: PaymentStatus) -> bool {
        matches!(
            (self, to),
            (PaymentStatus::Pending, PaymentStatus::Processing)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Processing, PaymentStatus::Completed)
                | (PaymentStatus::Processing, PaymentStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body of `POST /pay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayRequest {
    pub original_url: String,
    pub original_method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub original_headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_body: Option<String>,
    pub payment_required: PaymentRequirement,
    pub agent_wallet: WalletAddress,
    pub agent_auth: PaymentAuthorization,
    /// Caller-chosen payment id. A collision is treated as a status-only
    /// upsert; the captured original request never changes after insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// `202 Accepted` answer to `POST /pay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayAccepted {
    pub payment_id: String,
    pub status: PaymentStatus,
}

/// Body of `GET /pay/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentView {
    pub payment_id: String,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        use PaymentStatus::*;
        assert!(Pending.can_transition(Processing));
        assert!(Pending.can_transition(Failed));
        assert!(Processing.can_transition(Completed));
        assert!(Processing.can_transition(Failed));

        assert!(!Processing.can_transition(Pending));
        assert!(!Completed.can_transition(Failed));
        assert!(!Completed.can_transition(Processing));
        assert!(!Failed.can_transition(Pending));
        assert!(!Failed.can_transition(Completed));
    }

    #[test]
    fn terminal_states() {
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Processing.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Processing).unwrap(),
            "\"processing\""
        );
    }
}
