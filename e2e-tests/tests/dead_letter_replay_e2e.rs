//! Relay outage across the whole chain: payment succeeds, the confirmation
//! email exhausts its retries into the dead-letter sink, an operator replay
//! delivers it after the relay recovers. The payment leg is never affected.

use event_broker::{
    run_forwarder_task, Broker, BrokerConfig, IdempotencyLedger, InMemoryLedger, InMemoryOutbox,
    OutboxStore, Publisher, RetryConfig,
};
use notifications_rs::{MockMailer, NotificationStore};
use orders_rs::{create_order, CreateOrderRequest, OrderStore};
use payments_rs::{MockGateway, PaymentGateway, PaymentStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_notification_outage_dead_letters_and_replays() {
    let config = BrokerConfig {
        retry: RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        },
        forwarder_interval: Duration::from_millis(20),
        ..BrokerConfig::default()
    };
    let forwarder_interval = config.forwarder_interval;
    let broker = Arc::new(Broker::new(config));

    let order_store = Arc::new(OrderStore::new());
    let order_outbox = Arc::new(InMemoryOutbox::new());
    let order_publisher = Publisher::new(
        Arc::clone(&order_outbox) as Arc<dyn OutboxStore>,
        "orders",
    );
    tokio::spawn(run_forwarder_task(
        Arc::clone(&order_outbox) as Arc<dyn OutboxStore>,
        Arc::clone(&broker),
        forwarder_interval,
    ));

    let payment_store = Arc::new(PaymentStore::new());
    let payment_outbox = Arc::new(InMemoryOutbox::new());
    let gateway = Arc::new(MockGateway::new());
    let payments_consumer = payments_rs::start_order_created_consumer(
        &broker,
        Arc::clone(&payment_store),
        Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
        Arc::clone(&payment_outbox) as Arc<dyn OutboxStore>,
        Arc::new(InMemoryLedger::new()) as Arc<dyn IdempotencyLedger>,
    )
    .unwrap();
    tokio::spawn(run_forwarder_task(
        Arc::clone(&payment_outbox) as Arc<dyn OutboxStore>,
        Arc::clone(&broker),
        forwarder_interval,
    ));

    let notification_store = Arc::new(NotificationStore::new());
    let mailer = Arc::new(MockMailer::new());
    // Relay is down for longer than the retry budget
    mailer.fail_next(5);
    let notifications_consumer = notifications_rs::start_payment_processed_consumer(
        &broker,
        Arc::clone(&notification_store),
        Arc::clone(&mailer) as Arc<dyn notifications_rs::Mailer>,
        Arc::new(InMemoryLedger::new()) as Arc<dyn IdempotencyLedger>,
    )
    .unwrap();

    let (order, _) = create_order(
        &order_store,
        &order_publisher,
        CreateOrderRequest {
            user_id: 7,
            user_email: "buyer@example.com".to_string(),
            amount_minor: 1999,
            currency: "usd".to_string(),
            item_count: 2,
        },
    )
    .await
    .unwrap();

    // Let the payment leg finish and the notification leg burn its retries
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Payment leg unaffected by the outage downstream
    let payment = payment_store
        .get_by_order(order.order_id)
        .expect("payment persisted");
    assert_eq!(payment.status, "completed");

    // The notification landed in the dead-letter sink with a full attempt count
    assert_eq!(mailer.sent_count(), 0);
    let dead = broker.dead_letters().list();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].event_type, "payment.processed");
    assert_eq!(dead[0].queue, notifications_rs::QUEUE);
    assert_eq!(dead[0].attempts, 5);
    assert_eq!(dead[0].correlation_id, format!("ORD-{}", order.order_id));

    // Relay recovered; operator replays the dead letter
    broker.replay_dead_letter(dead[0].event_id).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    notifications_consumer.stop().await;
    payments_consumer.stop().await;

    assert_eq!(mailer.sent_count(), 1);
    assert!(notification_store.get_by_order(order.order_id).is_some());
    assert!(broker.dead_letters().is_empty());
}
