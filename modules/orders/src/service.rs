//! Order creation path
//!
//! The checkout request commits the order locally and enqueues
//! `order.created` to the outbox in the same step; the broker is never called
//! here, so a broker outage cannot fail or block order creation. The outbox
//! forwarder gets the event onto the pipeline asynchronously.

use crate::models::{CreateOrderRequest, Order, OrderCreatedPayload};
use crate::store::OrderStore;
use event_broker::Publisher;

/// Correlation id for the whole causal chain spawned by one order.
pub fn correlation_id_for(order: &Order) -> String {
    format!("ORD-{}", order.order_id)
}

/// Create an order and stage its `order.created` event.
///
/// Returns the committed order and the staged event's id.
pub async fn create_order(
    store: &OrderStore,
    publisher: &Publisher,
    request: CreateOrderRequest,
) -> anyhow::Result<(Order, uuid::Uuid)> {
    let order = store.insert(&request);

    let payload = OrderCreatedPayload {
        order_id: order.order_id,
        user_id: order.user_id,
        user_email: order.user_email.clone(),
        amount_minor: order.amount_minor,
        currency: order.currency.clone(),
        item_count: order.item_count,
    };

    let event_id = publisher
        .publish("order.created", &correlation_id_for(&order), payload)
        .await?;

    tracing::info!(
        order_id = order.order_id,
        event_id = %event_id,
        amount_minor = order.amount_minor,
        "Order created, order.created staged in outbox"
    );

    Ok((order, event_id))
}
