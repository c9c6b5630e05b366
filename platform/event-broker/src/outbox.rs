//! Transactional outbox and forwarder
//!
//! Publishing directly from a code path that also commits domain state is a
//! dual-write: if the broker is down after the commit, the event is lost and
//! at-least-once silently degrades to at-most-once. The outbox closes that
//! gap: the event is stored next to the domain write, and a background
//! forwarder publishes it to the broker asynchronously, marking it published
//! only after the broker accepted it.

use crate::broker::Broker;
use crate::envelope::EventEnvelope;
use crate::{BrokerError, BrokerResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// A row in the outbox: the envelope awaiting (or after) forwarding.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    /// Routing key the forwarder publishes under
    pub routing_key: String,
    /// Serialized envelope
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Durable store for events written alongside the domain transaction.
///
/// Implementations co-locate this with the publisher's own store so the
/// enqueue happens inside the same transaction boundary as the domain write.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, event: OutboxEvent);

    /// Oldest-first unpublished events, up to `limit`.
    async fn fetch_unpublished(&self, limit: usize) -> Vec<OutboxEvent>;

    async fn mark_published(&self, event_id: Uuid);
}

/// In-memory outbox for tests and the in-process pipeline.
#[derive(Debug, Default)]
pub struct InMemoryOutbox {
    events: Mutex<Vec<OutboxEvent>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unpublished_count(&self) -> usize {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().filter(|e| e.published_at.is_none()).count()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutbox {
    async fn enqueue(&self, event: OutboxEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(event);
    }

    async fn fetch_unpublished(&self, limit: usize) -> Vec<OutboxEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events
            .iter()
            .filter(|e| e.published_at.is_none())
            .take(limit)
            .cloned()
            .collect()
    }

    async fn mark_published(&self, event_id: Uuid) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(event) = events.iter_mut().find(|e| e.event_id == event_id) {
            event.published_at = Some(Utc::now());
        }
    }
}

/// Typed publish front-end writing to an outbox instead of the broker.
///
/// `publish` returns once the envelope is stored; the forwarder task gets it
/// onto the broker. Callers therefore never observe broker downtime here.
pub struct Publisher {
    store: Arc<dyn OutboxStore>,
    source_module: String,
}

impl Publisher {
    pub fn new(store: Arc<dyn OutboxStore>, source_module: impl Into<String>) -> Self {
        Self {
            store,
            source_module: source_module.into(),
        }
    }

    /// Build an envelope for `payload` and store it for forwarding.
    ///
    /// The routing key doubles as the envelope's `event_type` and must be
    /// non-empty. Returns the generated event id.
    pub async fn publish<T: Serialize>(
        &self,
        routing_key: &str,
        correlation_id: &str,
        payload: T,
    ) -> BrokerResult<Uuid> {
        self.publish_envelope(EventEnvelope::new(
            routing_key.to_string(),
            correlation_id.to_string(),
            self.source_module.clone(),
            payload,
        ))
        .await
    }

    /// Store a pre-built envelope (used when the caller sets causation or a
    /// schema version).
    pub async fn publish_envelope<T: Serialize>(
        &self,
        envelope: EventEnvelope<T>,
    ) -> BrokerResult<Uuid> {
        if envelope.event_type.is_empty() {
            return Err(BrokerError::InvalidRoutingKey("empty".to_string()));
        }

        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;

        self.store
            .enqueue(OutboxEvent {
                event_id: envelope.event_id,
                routing_key: envelope.event_type.clone(),
                payload,
                created_at: Utc::now(),
                published_at: None,
            })
            .await;

        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            "Event enqueued to outbox"
        );

        Ok(envelope.event_id)
    }
}

/// Background task forwarding outbox events to the broker.
///
/// Polls the store on an interval, publishes oldest-first, and marks rows
/// published only after the broker accepted them. On a broker failure the
/// batch stops and the remaining rows are retried next tick, so nothing is
/// lost while the broker is unavailable.
pub async fn run_forwarder_task(store: Arc<dyn OutboxStore>, broker: Arc<Broker>, tick: Duration) {
    tracing::info!("Starting outbox forwarder task");

    let mut interval = tokio::time::interval(tick);
    let mut tick_count: u64 = 0;

    loop {
        interval.tick().await;
        tick_count += 1;

        match forward_batch(&store, &broker).await {
            Ok(count) if count > 0 => {
                tracing::info!(tick = tick_count, published = count, "Forwarded outbox batch");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(tick = tick_count, error = %e, "Outbox forwarding failed, will retry");
            }
        }
    }
}

/// Forward up to one batch of unpublished events. Exposed for deterministic
/// draining in tests and the demo.
pub async fn forward_batch(store: &Arc<dyn OutboxStore>, broker: &Arc<Broker>) -> BrokerResult<usize> {
    let events = store.fetch_unpublished(100).await;
    let mut published = 0usize;

    for event in events {
        broker.publish(&event.routing_key, event.payload.clone()).await?;
        store.mark_published(event.event_id).await;
        published += 1;

        tracing::debug!(
            event_id = %event.event_id,
            routing_key = %event.routing_key,
            "Outbox event forwarded"
        );
    }

    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use serde_json::json;

    fn pipeline() -> (Arc<InMemoryOutbox>, Arc<Broker>, Publisher) {
        let store = Arc::new(InMemoryOutbox::new());
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        broker.declare_queue("q");
        broker.bind("q", "order.*").unwrap();
        let publisher = Publisher::new(Arc::clone(&store) as Arc<dyn OutboxStore>, "orders");
        (store, broker, publisher)
    }

    #[tokio::test]
    async fn test_publish_lands_in_outbox_not_broker() {
        let (store, broker, publisher) = pipeline();

        let event_id = publisher
            .publish("order.created", "ORD-1", json!({"order_id": 1}))
            .await
            .unwrap();

        assert_eq!(store.unpublished_count(), 1);
        assert!(broker.queue("q").unwrap().try_dequeue().is_none());

        let outbox_store: Arc<dyn OutboxStore> = Arc::clone(&store) as Arc<dyn OutboxStore>;
        let forwarded = forward_batch(&outbox_store, &broker).await.unwrap();
        assert_eq!(forwarded, 1);
        assert_eq!(store.unpublished_count(), 0);

        let delivery = broker.queue("q").unwrap().try_dequeue().unwrap();
        assert_eq!(delivery.message.event_id, event_id);
    }

    #[tokio::test]
    async fn test_publish_rejects_empty_routing_key() {
        let (_, _, publisher) = pipeline();
        let result = publisher.publish("", "ORD-1", json!({})).await;
        assert!(matches!(result, Err(BrokerError::InvalidRoutingKey(_))));
    }

    #[tokio::test]
    async fn test_broker_outage_keeps_events_unpublished() {
        let (store, broker, publisher) = pipeline();

        publisher
            .publish("order.created", "ORD-1", json!({"order_id": 1}))
            .await
            .unwrap();

        broker.shut_down();
        let outbox_store: Arc<dyn OutboxStore> = Arc::clone(&store) as Arc<dyn OutboxStore>;
        let result = forward_batch(&outbox_store, &broker).await;
        assert!(matches!(result, Err(BrokerError::Unavailable(_))));

        // The domain event survives the outage for a later forward
        assert_eq!(store.unpublished_count(), 1);
    }

    #[tokio::test]
    async fn test_forward_batch_is_oldest_first() {
        let (store, broker, publisher) = pipeline();

        publisher
            .publish("order.created", "ORD-1", json!({"n": 1}))
            .await
            .unwrap();
        publisher
            .publish("order.created", "ORD-2", json!({"n": 2}))
            .await
            .unwrap();

        let outbox_store: Arc<dyn OutboxStore> = Arc::clone(&store) as Arc<dyn OutboxStore>;
        forward_batch(&outbox_store, &broker).await.unwrap();

        let queue = broker.queue("q").unwrap();
        let first = queue.try_dequeue().unwrap();
        let second = queue.try_dequeue().unwrap();
        assert_eq!(first.message.correlation_id, "ORD-1");
        assert_eq!(second.message.correlation_id, "ORD-2");
    }
}
