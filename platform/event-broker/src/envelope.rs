//! # Event Envelope
//!
//! Canonical envelope for all events crossing module boundaries.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Unique identifier, the idempotency key downstream
//! - `event_type`: Dotted string (e.g. `order.created`), doubles as the
//!   default routing key
//! - `schema_version`: Version of the payload schema for this event type
//! - `occurred_at`: Publisher-assigned timestamp (not broker receipt time)
//! - `source_module`: Module that produced the event
//! - `correlation_id`: Links every derived event back to the originating
//!   request (e.g. the order id)
//! - `causation_id`: Links this event to the event that caused it
//! - `attempt`: Redelivery counter, incremented on each delivery attempt
//! - `payload`: Event-specific data (generic type parameter)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard event envelope, immutable once published (only `attempt` is
/// advanced by the delivery machinery).
///
/// # Type Parameter
///
/// * `T` - The event-specific payload type
///
/// # Examples
///
/// ```rust
/// use event_broker::EventEnvelope;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct OrderCreated {
///     order_id: i64,
///     amount_minor: i64,
/// }
///
/// let envelope = EventEnvelope::new(
///     "order.created".to_string(),
///     "ORD-42".to_string(),
///     "orders".to_string(),
///     OrderCreated { order_id: 42, amount_minor: 1999 },
/// );
/// assert_eq!(envelope.event_type, "order.created");
/// assert_eq!(envelope.attempt, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier (idempotency key)
    pub event_id: Uuid,

    /// Dotted event type; the default routing key
    pub event_type: String,

    /// Payload schema version for safe evolution
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,

    /// Timestamp assigned by the publisher when the event was generated
    pub occurred_at: DateTime<Utc>,

    /// Module that generated the event (e.g. "orders", "payments")
    pub source_module: String,

    /// Links related events in a business transaction
    pub correlation_id: String,

    /// Links this event to the event that caused it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,

    /// Delivery attempts so far; starts at 0, advanced on redelivery
    #[serde(default)]
    pub attempt: u32,

    /// Event-specific payload
    pub payload: T,
}

fn default_schema_version() -> u16 {
    1
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with auto-generated event_id and occurred_at.
    pub fn new(
        event_type: String,
        correlation_id: String,
        source_module: String,
        payload: T,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            schema_version: 1,
            occurred_at: Utc::now(),
            source_module,
            correlation_id,
            causation_id: None,
            attempt: 0,
            payload,
        }
    }

    /// Create an envelope with an explicit event_id (useful for testing).
    pub fn with_event_id(
        event_id: Uuid,
        event_type: String,
        correlation_id: String,
        source_module: String,
        payload: T,
    ) -> Self {
        Self {
            event_id,
            event_type,
            schema_version: 1,
            occurred_at: Utc::now(),
            source_module,
            correlation_id,
            causation_id: None,
            attempt: 0,
            payload,
        }
    }

    /// Set the payload schema version
    pub fn with_schema_version(mut self, version: u16) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the causation ID
    pub fn with_causation_id(mut self, causation_id: Option<String>) -> Self {
        self.causation_id = causation_id;
        self
    }
}

/// Validate envelope fields at the JSON level, before typed decoding.
///
/// Consumers run this first so malformed input is classified as a permanent
/// failure (dead-letter) instead of panicking a handler.
///
/// # Validation Rules
///
/// - `event_id`: must be present and parse as a UUID
/// - `event_type`: must be non-empty
/// - `occurred_at`: must be present
/// - `source_module`: must be non-empty
/// - `correlation_id`: must be non-empty
pub fn validate_envelope_fields(envelope: &serde_json::Value) -> Result<(), String> {
    let event_id = envelope
        .get("event_id")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid event_id")?;

    Uuid::parse_str(event_id).map_err(|_| format!("event_id is not a UUID: {event_id}"))?;

    let event_type = envelope
        .get("event_type")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid event_type")?;

    if event_type.is_empty() {
        return Err("event_type cannot be empty".to_string());
    }

    envelope
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid occurred_at")?;

    let source_module = envelope
        .get("source_module")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid source_module")?;

    if source_module.is_empty() {
        return Err("source_module cannot be empty".to_string());
    }

    let correlation_id = envelope
        .get("correlation_id")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid correlation_id")?;

    if correlation_id.is_empty() {
        return Err("correlation_id cannot be empty".to_string());
    }

    // causation_id is optional; attempt defaults to 0
    Ok(())
}
