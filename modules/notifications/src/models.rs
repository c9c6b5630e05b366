use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Incoming event payloads
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
    pub status: String,
}

// ============================================================================
// Domain records (owned by this module's local store)
// ============================================================================

/// A sent notification, recorded after the relay accepted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: String,
    pub order_id: i64,
    pub to: String,
    pub template_id: String,
    pub sent_at: DateTime<Utc>,
}
