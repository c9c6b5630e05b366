//! Broker: routing fabric + queues + dead-letter sink behind one handle
//!
//! The broker is constructed explicitly at startup and passed to publishers
//! and consumers; there is no module-level state. Binding changes swap in a
//! new routing-table version and only affect events published afterwards.

use crate::config::BrokerConfig;
use crate::dead_letter::DeadLetterSink;
use crate::envelope::EventEnvelope;
use crate::queue::{DurableQueue, QueueConfig};
use crate::routing::{Binding, RoutingTable};
use crate::{BrokerError, BrokerResult, Message};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Topic-routed message broker with durable per-consumer-group queues.
///
/// `publish` returns as soon as the event is stored in every matching queue;
/// it never waits for consumer acknowledgment, so a slow or offline consumer
/// cannot block the publishing path.
pub struct Broker {
    config: BrokerConfig,
    routing: RwLock<Arc<RoutingTable>>,
    queues: RwLock<HashMap<String, Arc<DurableQueue>>>,
    dead_letters: Arc<DeadLetterSink>,
    shutdown: AtomicBool,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            routing: RwLock::new(Arc::new(RoutingTable::default())),
            queues: RwLock::new(HashMap::new()),
            dead_letters: Arc::new(DeadLetterSink::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Create a queue for a consumer group. Idempotent: declaring an existing
    /// queue returns the existing handle.
    pub fn declare_queue(&self, name: &str) -> Arc<DurableQueue> {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(queues.entry(name.to_string()).or_insert_with(|| {
            tracing::info!(queue = %name, "Queue declared");
            Arc::new(DurableQueue::new(
                name.to_string(),
                QueueConfig {
                    visibility_timeout: self.config.visibility_timeout,
                    retry: self.config.retry.clone(),
                },
                Arc::clone(&self.dead_letters),
            ))
        }))
    }

    /// Bind a declared queue to a routing-key pattern.
    ///
    /// Takes effect for events published after the call; already-enqueued
    /// messages are unaffected.
    pub fn bind(&self, queue: &str, pattern: &str) -> BrokerResult<()> {
        {
            let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
            if !queues.contains_key(queue) {
                return Err(BrokerError::UnknownQueue(queue.to_string()));
            }
        }

        let mut routing = self.routing.write().unwrap_or_else(|e| e.into_inner());
        let next = routing.with_binding(Binding::new(queue, pattern))?;
        tracing::info!(
            queue = %queue,
            pattern = %pattern,
            version = next.version(),
            "Binding added, routing table version swapped"
        );
        *routing = Arc::new(next);
        Ok(())
    }

    /// Declare queues and bindings from a declarative list, the startup path
    /// for `BINDINGS` configuration.
    pub fn apply_bindings(&self, bindings: &[Binding]) -> BrokerResult<()> {
        for binding in bindings {
            self.declare_queue(&binding.queue);
            self.bind(&binding.queue, &binding.pattern)?;
        }
        Ok(())
    }

    /// Look up a queue handle for a consumer.
    pub fn queue(&self, name: &str) -> BrokerResult<Arc<DurableQueue>> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    /// Publish a serialized envelope to every queue bound to `routing_key`.
    ///
    /// Fails fast with [`BrokerError::Unavailable`] once the broker is shut
    /// down; callers using the outbox keep the event and forward it later.
    pub async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> BrokerResult<()> {
        if routing_key.is_empty() {
            return Err(BrokerError::InvalidRoutingKey("empty".to_string()));
        }
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("broker is shut down".to_string()));
        }

        let envelope: serde_json::Value = serde_json::from_slice(&payload)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        crate::envelope::validate_envelope_fields(&envelope)
            .map_err(BrokerError::Serialization)?;

        let event_id = envelope
            .get("event_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| BrokerError::Serialization("missing event_id".to_string()))?;
        let correlation_id = envelope
            .get("correlation_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let routing = {
            let guard = self.routing.read().unwrap_or_else(|e| e.into_inner());
            Arc::clone(&guard)
        };
        let targets: Vec<String> = routing
            .route(routing_key)
            .into_iter()
            .map(str::to_string)
            .collect();

        if targets.is_empty() {
            tracing::warn!(
                routing_key = %routing_key,
                event_id = %event_id,
                "No queue bound for routing key, event dropped at routing"
            );
            return Ok(());
        }

        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        for target in &targets {
            let Some(queue) = queues.get(target) else {
                // Binding references a queue that was never declared
                tracing::warn!(queue = %target, "Bound queue missing, skipping");
                continue;
            };
            queue.enqueue(Message {
                event_id,
                event_type: routing_key.to_string(),
                correlation_id: correlation_id.clone(),
                payload: payload.clone(),
                attempt: 0,
            });
        }

        tracing::debug!(
            event_id = %event_id,
            routing_key = %routing_key,
            fan_out = targets.len(),
            "Event published"
        );

        Ok(())
    }

    /// Serialize and publish a typed envelope, returning its event id.
    pub async fn publish_envelope<T: Serialize>(
        &self,
        envelope: &EventEnvelope<T>,
    ) -> BrokerResult<Uuid> {
        let payload = serde_json::to_vec(envelope)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        self.publish(&envelope.event_type, payload).await?;
        Ok(envelope.event_id)
    }

    /// The terminal store for exhausted and poison messages.
    pub fn dead_letters(&self) -> &DeadLetterSink {
        &self.dead_letters
    }

    /// Re-enqueue a dead-lettered event to its original queue with the
    /// attempt counter reset. Operator-driven manual replay.
    pub fn replay_dead_letter(&self, event_id: Uuid) -> BrokerResult<()> {
        let entry = self
            .dead_letters
            .take(event_id)
            .ok_or(BrokerError::DeadLetterNotFound(event_id))?;

        let queue = self.queue(&entry.queue)?;
        queue.enqueue(Message {
            event_id: entry.event_id,
            event_type: entry.event_type.clone(),
            correlation_id: entry.correlation_id,
            payload: entry.payload,
            attempt: 0,
        });

        tracing::info!(
            event_id = %event_id,
            queue = %entry.queue,
            event_type = %entry.event_type,
            "Dead letter replayed"
        );
        Ok(())
    }

    /// Stop accepting publishes. Queued messages stay consumable so draining
    /// consumers can finish.
    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        tracing::info!("Broker shut down, further publishes will be rejected");
    }

    /// Whether the broker currently accepts publishes.
    pub fn is_available(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}
