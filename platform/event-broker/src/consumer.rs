//! Consumer runtime
//!
//! Explicit state machine per message: Received → Processing → {Acked |
//! NackedRequeue | NackedDeadLetter}. The handler is injected, so the
//! ack/retry logic is testable independently of any handler, and a handler
//! error can never escape the runtime — every outcome is converted into an
//! ack/nack decision.

use crate::envelope::{validate_envelope_fields, EventEnvelope};
use crate::idempotency::IdempotencyLedger;
use crate::queue::{Delivery, DurableQueue};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::Instrument;

/// Handler outcome classification:
///
/// - `Transient`: worth retrying (network timeout, downstream 5xx, ambiguous
///   external effect) — the message is nacked for redelivery with backoff
/// - `Permanent`: will never succeed (malformed payload, violated business
///   invariant) — the message dead-letters immediately
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn permanent(err: impl std::fmt::Display) -> Self {
        Self::Permanent(err.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Business logic invoked once per delivered message.
///
/// Handlers receive the decoded envelope with the payload still as JSON;
/// typed decoding (keyed by `event_type` and `schema_version`) happens inside
/// the handler, where an unknown type or version is a permanent failure.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: EventEnvelope<serde_json::Value>) -> Result<(), HandlerError>;
}

/// Runtime tuning per consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Longest a single dequeue waits before looping (shutdown check cadence)
    pub poll_wait: Duration,
    /// Budget for one handler invocation; exceeding it is a transient
    /// failure. Must be shorter than the queue's visibility timeout or a
    /// stuck handler holds the lease past redelivery.
    pub handler_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_millis(500),
            handler_timeout: Duration::from_secs(10),
        }
    }
}

/// Cloneable "connected and consuming" signal for orchestration layers.
#[derive(Debug, Clone, Default)]
pub struct ConsumerHealth(Arc<AtomicBool>);

impl ConsumerHealth {
    pub fn is_consuming(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// One consumer instance pulling from its group's queue.
///
/// Several instances may share a queue (competing consumers); the queue's
/// visibility lease ensures each message is processed by one instance at a
/// time, without application-level coordination.
pub struct ConsumerRuntime {
    group: String,
    queue: Arc<DurableQueue>,
    handler: Arc<dyn EventHandler>,
    ledger: Arc<dyn IdempotencyLedger>,
    config: ConsumerConfig,
}

/// Handle to a spawned consumer: health signal plus graceful stop.
pub struct ConsumerHandle {
    health: ConsumerHealth,
    stop_flag: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn health(&self) -> ConsumerHealth {
        self.health.clone()
    }

    /// Request a graceful stop and wait for the loop to exit. In-flight
    /// processing finishes first.
    pub async fn stop(self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        let _ = self.task.await;
    }

    /// Kill the consumer without settling any lease, simulating a crash.
    /// Whatever was in flight redelivers after the visibility timeout.
    pub fn abort(self) {
        self.task.abort();
        self.health.set(false);
    }
}

impl ConsumerRuntime {
    pub fn new(
        group: impl Into<String>,
        queue: Arc<DurableQueue>,
        handler: Arc<dyn EventHandler>,
        ledger: Arc<dyn IdempotencyLedger>,
    ) -> Self {
        Self {
            group: group.into(),
            queue,
            handler,
            ledger,
            config: ConsumerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the consume loop onto the runtime.
    pub fn spawn(self) -> ConsumerHandle {
        let health = ConsumerHealth::default();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());

        let task = {
            let health = health.clone();
            let stop_flag = Arc::clone(&stop_flag);
            let stop_notify = Arc::clone(&stop_notify);
            tokio::spawn(async move {
                self.run(health, stop_flag, stop_notify).await;
            })
        };

        ConsumerHandle {
            health,
            stop_flag,
            stop_notify,
            task,
        }
    }

    async fn run(self, health: ConsumerHealth, stop_flag: Arc<AtomicBool>, stop_notify: Arc<Notify>) {
        tracing::info!(
            consumer_group = %self.group,
            queue = %self.queue.name(),
            "Consumer started"
        );
        health.set(true);

        while !stop_flag.load(Ordering::SeqCst) {
            let delivery = tokio::select! {
                maybe = self.queue.dequeue_wait(self.config.poll_wait) => maybe,
                _ = stop_notify.notified() => None,
            };

            if let Some(delivery) = delivery {
                self.process(delivery).await;
            }
        }

        health.set(false);
        tracing::info!(consumer_group = %self.group, "Consumer stopped");
    }

    /// Drive one message through the state machine.
    async fn process(&self, delivery: Delivery) {
        let message = &delivery.message;

        let span = tracing::info_span!(
            "process_event",
            consumer_group = %self.group,
            queue = %self.queue.name(),
            event_id = %message.event_id,
            event_type = %message.event_type,
            correlation_id = %message.correlation_id,
            attempt = message.attempt,
        );

        async {
            // Decode and validate before touching business logic; anything
            // malformed is poison and dead-letters without retries.
            let envelope = match self.decode(message) {
                Ok(envelope) => envelope,
                Err(reason) => {
                    tracing::error!(error = %reason, "Malformed envelope, dead-lettering");
                    self.settle_nack(&delivery, false, &reason);
                    return;
                }
            };

            // Idempotency guard: a redelivered-but-already-processed event is
            // acked without re-running the handler.
            if self
                .ledger
                .already_processed(&self.group, envelope.event_id)
                .await
            {
                tracing::info!("Duplicate event ignored (already processed)");
                self.settle_ack(&delivery);
                return;
            }

            let outcome =
                match tokio::time::timeout(self.config.handler_timeout, self.handler.handle(envelope))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(HandlerError::Transient(format!(
                        "handler exceeded {}ms budget",
                        self.config.handler_timeout.as_millis()
                    ))),
                };

            match outcome {
                Ok(()) => {
                    // Ledger first: if the ack is lost to a crash, redelivery
                    // hits the guard instead of repeating the side effect.
                    self.ledger
                        .record_processed(&self.group, message.event_id, "completed")
                        .await;
                    self.settle_ack(&delivery);
                }
                Err(HandlerError::Transient(reason)) => {
                    self.settle_nack(&delivery, true, &reason);
                }
                Err(HandlerError::Permanent(reason)) => {
                    tracing::error!(error = %reason, "Permanent failure, dead-lettering");
                    self.settle_nack(&delivery, false, &reason);
                }
            }
        }
        .instrument(span)
        .await;
    }

    fn decode(&self, message: &crate::Message) -> Result<EventEnvelope<serde_json::Value>, String> {
        let raw: serde_json::Value =
            serde_json::from_slice(&message.payload).map_err(|e| e.to_string())?;
        validate_envelope_fields(&raw)?;
        let mut envelope: EventEnvelope<serde_json::Value> =
            serde_json::from_value(raw).map_err(|e| e.to_string())?;
        envelope.attempt = message.attempt;
        Ok(envelope)
    }

    fn settle_ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(&delivery.ack_token) {
            // Lease expired mid-processing; the redelivery will hit the
            // idempotency guard
            tracing::warn!(error = %e, "Ack failed, lease already expired");
        }
    }

    fn settle_nack(&self, delivery: &Delivery, requeue: bool, reason: &str) {
        if let Err(e) = self.queue.nack(&delivery.ack_token, requeue, reason) {
            tracing::warn!(error = %e, "Nack failed, lease already expired");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::DeadLetterSink;
    use crate::idempotency::InMemoryLedger;
    use crate::queue::QueueConfig;
    use crate::retry::RetryConfig;
    use crate::Message;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use uuid::Uuid;

    struct ScriptedHandler {
        calls: AtomicU32,
        /// Fail the first N invocations with a transient error
        fail_first: u32,
        permanent: bool,
    }

    impl ScriptedHandler {
        fn succeeding() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: 0,
                permanent: false,
            }
        }

        fn failing_first(n: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: n,
                permanent: false,
            }
        }

        fn poisoned() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: u32::MAX,
                permanent: true,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for ScriptedHandler {
        async fn handle(
            &self,
            _envelope: EventEnvelope<serde_json::Value>,
        ) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                if self.permanent {
                    Err(HandlerError::permanent("business invariant violated"))
                } else {
                    Err(HandlerError::transient("downstream unavailable"))
                }
            } else {
                Ok(())
            }
        }
    }

    struct Fixture {
        queue: Arc<DurableQueue>,
        sink: Arc<DeadLetterSink>,
        ledger: Arc<InMemoryLedger>,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        let sink = Arc::new(DeadLetterSink::new());
        let queue = Arc::new(DurableQueue::new(
            "payments.order-created".to_string(),
            QueueConfig {
                visibility_timeout: Duration::from_secs(30),
                retry: RetryConfig {
                    max_attempts,
                    initial_backoff: Duration::from_millis(50),
                    max_backoff: Duration::from_secs(1),
                },
            },
            Arc::clone(&sink),
        ));
        Fixture {
            queue,
            sink,
            ledger: Arc::new(InMemoryLedger::new()),
        }
    }

    fn publish(queue: &DurableQueue, event_id: Uuid) {
        let envelope = json!({
            "event_id": event_id,
            "event_type": "order.created",
            "occurred_at": chrono::Utc::now().to_rfc3339(),
            "source_module": "orders",
            "correlation_id": "ORD-1",
            "payload": {"order_id": 1}
        });
        queue.enqueue(Message {
            event_id,
            event_type: "order.created".to_string(),
            correlation_id: "ORD-1".to_string(),
            payload: serde_json::to_vec(&envelope).unwrap(),
            attempt: 0,
        });
    }

    fn runtime(fixture: &Fixture, handler: Arc<ScriptedHandler>) -> ConsumerRuntime {
        ConsumerRuntime::new(
            "payments",
            Arc::clone(&fixture.queue),
            handler,
            Arc::clone(&fixture.ledger) as Arc<dyn IdempotencyLedger>,
        )
        .with_config(ConsumerConfig {
            poll_wait: Duration::from_millis(50),
            handler_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_acks_and_records_ledger() {
        let fx = fixture(5);
        let handler = Arc::new(ScriptedHandler::succeeding());
        let event_id = Uuid::new_v4();
        publish(&fx.queue, event_id);

        let handle = runtime(&fx, Arc::clone(&handler)).spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.health().is_consuming());
        handle.stop().await;

        assert_eq!(handler.calls(), 1);
        assert_eq!(fx.queue.depth(), 0);
        assert_eq!(fx.queue.in_flight_count(), 0);
        assert!(fx.ledger.already_processed("payments", event_id).await);
        assert!(fx.sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_delivery_is_noop() {
        let fx = fixture(5);
        let handler = Arc::new(ScriptedHandler::succeeding());
        let event_id = Uuid::new_v4();

        // Same event id delivered twice (redelivery after a lost ack)
        publish(&fx.queue, event_id);
        publish(&fx.queue, event_id);

        let handle = runtime(&fx, Arc::clone(&handler)).spawn();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop().await;

        // Second delivery hit the ledger, not the handler
        assert_eq!(handler.calls(), 1);
        assert_eq!(fx.queue.depth(), 0);
        assert!(fx.sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_then_succeeds() {
        let fx = fixture(5);
        let handler = Arc::new(ScriptedHandler::failing_first(2));
        let event_id = Uuid::new_v4();
        publish(&fx.queue, event_id);

        let handle = runtime(&fx, Arc::clone(&handler)).spawn();
        // Two backoffs (< 200ms total) plus processing
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.stop().await;

        assert_eq!(handler.calls(), 3);
        assert!(fx.ledger.already_processed("payments", event_id).await);
        assert!(fx.sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_dead_letters() {
        let fx = fixture(3);
        let handler = Arc::new(ScriptedHandler::failing_first(u32::MAX));
        let event_id = Uuid::new_v4();
        publish(&fx.queue, event_id);

        let handle = runtime(&fx, Arc::clone(&handler)).spawn();
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.stop().await;

        assert_eq!(handler.calls(), 3);
        let dead = fx.sink.list();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].event_id, event_id);
        assert_eq!(dead[0].attempts, 3);
        assert!(!fx.ledger.already_processed("payments", event_id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_dead_letters_without_retry() {
        let fx = fixture(5);
        let handler = Arc::new(ScriptedHandler::poisoned());
        publish(&fx.queue, Uuid::new_v4());

        let handle = runtime(&fx, Arc::clone(&handler)).spawn();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop().await;

        assert_eq!(handler.calls(), 1);
        let dead = fx.sink.list();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_envelope_dead_letters() {
        let fx = fixture(5);
        let handler = Arc::new(ScriptedHandler::succeeding());

        fx.queue.enqueue(Message {
            event_id: Uuid::new_v4(),
            event_type: "order.created".to_string(),
            correlation_id: "ORD-1".to_string(),
            payload: b"not json at all".to_vec(),
            attempt: 0,
        });

        let handle = runtime(&fx, Arc::clone(&handler)).spawn();
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop().await;

        assert_eq!(handler.calls(), 0);
        assert_eq!(fx.sink.len(), 1);
    }

    struct HangingHandler;

    #[async_trait]
    impl EventHandler for HangingHandler {
        async fn handle(
            &self,
            _envelope: EventEnvelope<serde_json::Value>,
        ) -> Result<(), HandlerError> {
            // Stuck external call without its own timeout
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_handler_is_transient() {
        let fx = fixture(2);
        publish(&fx.queue, Uuid::new_v4());

        let handle = ConsumerRuntime::new(
            "payments",
            Arc::clone(&fx.queue),
            Arc::new(HangingHandler),
            Arc::clone(&fx.ledger) as Arc<dyn IdempotencyLedger>,
        )
        .with_config(ConsumerConfig {
            poll_wait: Duration::from_millis(50),
            handler_timeout: Duration::from_millis(100),
        })
        .spawn();

        // Two timed-out attempts exhaust max_attempts = 2
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.stop().await;

        let dead = fx.sink.list();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].last_error.contains("budget"));
    }
}
