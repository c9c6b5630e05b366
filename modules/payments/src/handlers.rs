//! Handler for order.created
//!
//! Capture flow: decode → capture via the gateway (bounded call) → persist
//! the outcome → stage payment.processed through the outbox. The chained
//! event is staged only after the local write, same discipline as the
//! original publish.

use crate::models::{OrderCreatedPayload, Payment, PaymentProcessedPayload};
use crate::processor::{GatewayError, PaymentGateway};
use crate::store::PaymentStore;
use async_trait::async_trait;
use chrono::Utc;
use event_broker::{EventEnvelope, EventHandler, HandlerError, Publisher};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct PaymentHandler {
    store: Arc<PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Publisher,
    /// Budget for one gateway call; exceeding it is ambiguous → transient
    call_timeout: Duration,
}

impl PaymentHandler {
    pub fn new(
        store: Arc<PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Publisher,
    ) -> Self {
        Self {
            store,
            gateway,
            publisher,
            call_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    async fn settle(
        &self,
        envelope: &EventEnvelope<serde_json::Value>,
        order: &OrderCreatedPayload,
        status: &str,
        transaction_id: Option<String>,
    ) -> Result<(), HandlerError> {
        let payment = Payment {
            payment_id: Uuid::new_v4().to_string(),
            order_id: order.order_id,
            user_id: order.user_id,
            amount_minor: order.amount_minor,
            currency: order.currency.clone(),
            status: status.to_string(),
            transaction_id: transaction_id.clone(),
            created_at: Utc::now(),
        };
        self.store.insert(payment.clone());

        let payload = PaymentProcessedPayload {
            payment_id: payment.payment_id.clone(),
            order_id: order.order_id,
            user_id: order.user_id,
            user_email: order.user_email.clone(),
            amount_minor: order.amount_minor,
            currency: order.currency.clone(),
            transaction_id,
            status: status.to_string(),
        };

        let chained = EventEnvelope::new(
            "payment.processed".to_string(),
            envelope.correlation_id.clone(),
            "payments".to_string(),
            payload,
        )
        .with_causation_id(Some(envelope.event_id.to_string()));

        let event_id = self
            .publisher
            .publish_envelope(chained)
            .await
            .map_err(HandlerError::transient)?;

        tracing::info!(
            payment_id = %payment.payment_id,
            order_id = order.order_id,
            status = %status,
            event_id = %event_id,
            "Payment settled, payment.processed staged"
        );

        Ok(())
    }
}

#[async_trait]
impl EventHandler for PaymentHandler {
    async fn handle(&self, envelope: EventEnvelope<serde_json::Value>) -> Result<(), HandlerError> {
        if envelope.event_type != "order.created" {
            return Err(HandlerError::permanent(format!(
                "unexpected event type: {}",
                envelope.event_type
            )));
        }
        if envelope.schema_version != 1 {
            return Err(HandlerError::permanent(format!(
                "unsupported order.created schema version: {}",
                envelope.schema_version
            )));
        }

        let order: OrderCreatedPayload = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| HandlerError::permanent(format!("malformed order.created payload: {e}")))?;

        // Gateway idempotency key is derived from the order, not the event
        // id, so a replay of the same order can never double-charge
        let idempotency_key = format!("order-{}", order.order_id);

        // A local deadline elapsing is the same ambiguous outcome as a
        // gateway-reported timeout: the charge may or may not have happened
        let capture = tokio::time::timeout(
            self.call_timeout,
            self.gateway
                .capture(&idempotency_key, order.amount_minor, &order.currency),
        )
        .await
        .unwrap_or(Err(GatewayError::AmbiguousTimeout));

        match capture {
            Ok(capture) => {
                self.settle(&envelope, &order, "completed", Some(capture.transaction_id))
                    .await
            }
            Err(GatewayError::Declined(reason)) => {
                // Final domain outcome: the order will not be paid
                tracing::warn!(order_id = order.order_id, reason = %reason, "Payment declined");
                self.settle(&envelope, &order, "failed", None).await
            }
            Err(GatewayError::AmbiguousTimeout) => {
                // Unknown effect: retry later, the gateway's idempotency key
                // reconciles
                Err(HandlerError::transient(
                    "gateway timeout with unknown outcome",
                ))
            }
            Err(GatewayError::Unavailable(reason)) => {
                Err(HandlerError::transient(format!("gateway unavailable: {reason}")))
            }
        }
    }
}
