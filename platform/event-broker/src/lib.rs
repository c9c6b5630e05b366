//! # Event Broker
//!
//! A topic-routed event pipeline shared by all modules: at-least-once
//! delivery, idempotent consumption, bounded retry, and dead-letter
//! isolation.
//!
//! ## Why This Lives in Tier 1
//!
//! The broker is a **shared runtime capability** that all modules depend on.
//! Placing it in `platform/` allows:
//! - Modules to depend on platform crates without circular dependencies
//! - Plug-and-play module development (modules don't depend on each other)
//! - The whole pipeline to run in-process for dev/test and demos
//!
//! ## Pieces
//!
//! - [`EventEnvelope`]: canonical unit of transmission
//! - [`RoutingTable`]: immutable topic-pattern router (`*`, `#` wildcards)
//! - [`DurableQueue`]: per-consumer-group buffer with visibility timeouts
//! - [`Broker`]: routing + queues + dead-letter sink behind one handle
//! - [`ConsumerRuntime`]: dequeue/decode/guard/handle/ack state machine
//! - [`IdempotencyLedger`]: processed-event dedup per consumer group
//! - [`OutboxStore`] + [`run_forwarder_task`]: log-then-forward publishing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_broker::{Broker, BrokerConfig, EventEnvelope};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Arc::new(Broker::new(BrokerConfig::default()));
//! broker.declare_queue("payments.order-created");
//! broker.bind("payments.order-created", "order.*")?;
//!
//! let envelope = EventEnvelope::new(
//!     "order.created".to_string(),
//!     "ORD-42".to_string(),
//!     "orders".to_string(),
//!     serde_json::json!({ "order_id": 42 }),
//! );
//! let event_id = broker.publish_envelope(&envelope).await?;
//! println!("published {event_id}");
//! # Ok(())
//! # }
//! ```

mod broker;
mod config;
mod consumer;
mod dead_letter;
mod envelope;
mod idempotency;
mod outbox;
mod queue;
mod retry;
mod routing;

pub use broker::Broker;
pub use config::{parse_bindings, BrokerConfig};
pub use consumer::{
    ConsumerConfig, ConsumerHandle, ConsumerHealth, ConsumerRuntime, EventHandler, HandlerError,
};
pub use dead_letter::{DeadLetter, DeadLetterSink};
pub use envelope::{validate_envelope_fields, EventEnvelope};
pub use idempotency::{IdempotencyLedger, InMemoryLedger, LedgerEntry};
pub use outbox::{forward_batch, run_forwarder_task, InMemoryOutbox, OutboxEvent, OutboxStore, Publisher};
pub use queue::{AckToken, Delivery, DurableQueue, QueueConfig};
pub use retry::{backoff_delay, RetryConfig};
pub use routing::{Binding, RoutingTable};

use uuid::Uuid;

/// A message as carried by a queue: decoded routing metadata plus the raw
/// envelope bytes.
///
/// The broker extracts the metadata once at publish time so queues and the
/// dead-letter sink never re-parse the payload.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique event identifier (idempotency key downstream)
    pub event_id: Uuid,
    /// Dotted event type, doubles as the routing key
    pub event_type: String,
    /// Correlation id propagated across the causal chain
    pub correlation_id: String,
    /// Full serialized envelope (JSON)
    pub payload: Vec<u8>,
    /// Delivery attempts so far; 0 until first dequeue
    pub attempt: u32,
}

/// Errors that can occur when using the broker
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("unknown or expired ack token")]
    UnknownAckToken,

    #[error("invalid routing key: {0}")]
    InvalidRoutingKey(String),

    #[error("invalid binding pattern: {0}")]
    InvalidPattern(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(Uuid),
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
