//! Consumer wiring for the notifications group

use crate::handlers::NotificationHandler;
use crate::mailer::Mailer;
use crate::store::NotificationStore;
use event_broker::{
    Broker, BrokerResult, ConsumerHandle, ConsumerRuntime, IdempotencyLedger,
};
use std::sync::Arc;

/// Queue owned by the notifications consumer group.
pub const QUEUE: &str = "notifications.payment-processed";

/// Consumer group name, the idempotency-ledger scope.
pub const GROUP: &str = "notifications";

/// Declare and bind the notifications queue, then spawn the consumer.
pub fn start_payment_processed_consumer(
    broker: &Arc<Broker>,
    store: Arc<NotificationStore>,
    mailer: Arc<dyn Mailer>,
    ledger: Arc<dyn IdempotencyLedger>,
) -> BrokerResult<ConsumerHandle> {
    broker.declare_queue(QUEUE);
    broker.bind(QUEUE, "payment.processed")?;

    let handler = NotificationHandler::new(store, mailer);
    let runtime = ConsumerRuntime::new(GROUP, broker.queue(QUEUE)?, Arc::new(handler), ledger);

    tracing::info!(queue = %QUEUE, "Starting notification dispatch consumer");
    Ok(runtime.spawn())
}
