use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Domain records (owned by this module's local store)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub amount_minor: i64,
    pub currency: String,
    pub item_count: u32,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub user_email: String,
    pub amount_minor: i64,
    pub currency: String,
    pub item_count: u32,
}

// ============================================================================
// Outgoing event payloads
// ============================================================================

/// Payload for order.created — the minimal denormalized fields downstream
/// consumers need; the pipeline never carries full domain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub order_id: i64,
    pub user_id: i64,
    pub user_email: String,
    pub amount_minor: i64,
    pub currency: String,
    pub item_count: u32,
}
