//! End-to-end pipeline demo: one process hosting the broker, both outbox
//! forwarders, and both consumer groups, with mock gateway and mail relay.
//!
//! Creates a demo order, lets the chain run (order.created → payment capture
//! → payment.processed → confirmation email), then waits for Ctrl-C.

use event_broker::{
    run_forwarder_task, Broker, BrokerConfig, InMemoryLedger, InMemoryOutbox, OutboxStore,
    Publisher,
};
use notifications_rs::{MockMailer, NotificationStore};
use orders_rs::{create_order, CreateOrderRequest, OrderStore};
use payments_rs::{MockGateway, PaymentStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = BrokerConfig::from_env().map_err(anyhow::Error::msg)?;
    let forwarder_interval = config.forwarder_interval;
    let extra_bindings = config.bindings.clone();

    let broker = Arc::new(Broker::new(config));
    broker.apply_bindings(&extra_bindings)?;

    // Orders: local store plus an outbox whose forwarder feeds the broker
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

    // Payments: consumer group with its own outbox and ledger
    let payment_store = Arc::new(PaymentStore::new());
    let payment_outbox = Arc::new(InMemoryOutbox::new());
    let payment_ledger = Arc::new(InMemoryLedger::new());
    let gateway = Arc::new(MockGateway::new());
    let payments_consumer = payments_rs::start_order_created_consumer(
        &broker,
        Arc::clone(&payment_store),
        gateway,
        Arc::clone(&payment_outbox) as Arc<dyn OutboxStore>,
        payment_ledger,
    )?;
    tokio::spawn(run_forwarder_task(
        Arc::clone(&payment_outbox) as Arc<dyn OutboxStore>,
        Arc::clone(&broker),
        forwarder_interval,
    ));

    // Notifications: consumer group with the mock relay
    let notification_store = Arc::new(NotificationStore::new());
    let notification_ledger = Arc::new(InMemoryLedger::new());
    let mailer = Arc::new(MockMailer::new());
    let notifications_consumer = notifications_rs::start_payment_processed_consumer(
        &broker,
        Arc::clone(&notification_store),
        Arc::clone(&mailer) as Arc<dyn notifications_rs::Mailer>,
        notification_ledger,
    )?;

    tracing::info!("Pipeline up, creating demo order");

    let (order, event_id) = create_order(
        &order_store,
        &order_publisher,
        CreateOrderRequest {
            user_id: 1,
            user_email: "demo@example.com".to_string(),
            amount_minor: 4999,
            currency: "usd".to_string(),
            item_count: 3,
        },
    )
    .await?;

    tracing::info!(
        order_id = order.order_id,
        event_id = %event_id,
        "Demo order staged, watching the chain run (Ctrl-C to stop)"
    );

    tokio::signal::ctrl_c().await?;

    notifications_consumer.stop().await;
    payments_consumer.stop().await;
    broker.shut_down();

    tracing::info!(
        payments = payment_store.count(),
        notifications = notification_store.count(),
        emails_sent = mailer.sent_count(),
        dead_letters = broker.dead_letters().len(),
        "Pipeline stopped"
    );
    Ok(())
}
