//! Consumer wiring for the payments group
//!
//! Binds the module's queue to `order.created` and spawns one consumer
//! instance. More instances may be spawned against the same queue for
//! horizontal scaling; the queue's visibility lease keeps each message with
//! one instance at a time.

use crate::handlers::PaymentHandler;
use crate::processor::PaymentGateway;
use crate::store::PaymentStore;
use event_broker::{
    Broker, BrokerResult, ConsumerHandle, ConsumerRuntime, IdempotencyLedger, OutboxStore,
    Publisher,
};
use std::sync::Arc;

/// Queue owned by the payments consumer group.
pub const QUEUE: &str = "payments.order-created";

/// Consumer group name, the idempotency-ledger scope.
pub const GROUP: &str = "payments";

/// Declare and bind the payments queue, then spawn the consumer.
pub fn start_order_created_consumer(
    broker: &Arc<Broker>,
    store: Arc<PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    outbox: Arc<dyn OutboxStore>,
    ledger: Arc<dyn IdempotencyLedger>,
) -> BrokerResult<ConsumerHandle> {
    broker.declare_queue(QUEUE);
    broker.bind(QUEUE, "order.created")?;

    let handler = PaymentHandler::new(store, gateway, Publisher::new(outbox, GROUP));
    let runtime = ConsumerRuntime::new(GROUP, broker.queue(QUEUE)?, Arc::new(handler), ledger);

    tracing::info!(queue = %QUEUE, "Starting payment capture consumer");
    Ok(runtime.spawn())
}
