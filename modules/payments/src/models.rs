use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Incoming event payloads
// ============================================================================

/// Payload for order.created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub amount_minor: i64,
    pub currency: String,
    #[serde(default)]
    pub item_count: u32,
}

// ============================================================================
// Outgoing event payloads
// ============================================================================

/// Payload for payment.processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProcessedPayload {
    pub payment_id: String,
    pub order_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub amount_minor: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// "completed" or "failed"
    pub status: String,
}

// ============================================================================
// Domain records (owned by this module's local store)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    pub order_id: i64,
    pub user_id: i64,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
