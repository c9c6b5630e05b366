//! Handler for payment.processed
//!
//! Sends the payment confirmation email for completed payments. Failed
//! payments are acknowledged without a send: the payment outcome was
//! already decided upstream and there is no receipt to deliver.
//!
//! Every relay failure is transient. A confirmation email is never the
//! reason an event dead-letters on the first pass; the relay comes back or
//! the operator replays from the dead-letter sink.

use crate::mailer::Mailer;
use crate::models::{Notification, PaymentProcessedPayload};
use crate::store::NotificationStore;
use async_trait::async_trait;
use chrono::Utc;
use event_broker::{EventEnvelope, EventHandler, HandlerError};
use std::sync::Arc;
use uuid::Uuid;

const RECEIPT_TEMPLATE: &str = "payment-receipt-v1";

pub struct NotificationHandler {
    store: Arc<NotificationStore>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationHandler {
    pub fn new(store: Arc<NotificationStore>, mailer: Arc<dyn Mailer>) -> Self {
        Self { store, mailer }
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, envelope: EventEnvelope<serde_json::Value>) -> Result<(), HandlerError> {
        if envelope.event_type != "payment.processed" {
            return Err(HandlerError::permanent(format!(
                "unexpected event type: {}",
                envelope.event_type
            )));
        }
        if envelope.schema_version != 1 {
            return Err(HandlerError::permanent(format!(
                "unsupported payment.processed schema version: {}",
                envelope.schema_version
            )));
        }

        let payment: PaymentProcessedPayload = serde_json::from_value(envelope.payload.clone())
            .map_err(|e| {
                HandlerError::permanent(format!("malformed payment.processed payload: {e}"))
            })?;

        if payment.status != "completed" {
            // No receipt for a failed payment; ack and move on
            tracing::info!(
                order_id = payment.order_id,
                status = %payment.status,
                "Skipping notification for non-completed payment"
            );
            return Ok(());
        }

        let subject = format!("Payment confirmed for order {}", payment.order_id);
        let body = format!(
            "Your payment of {} {} for order {} was processed successfully.\nTransaction: {}",
            payment.amount_minor,
            payment.currency.to_uppercase(),
            payment.order_id,
            payment.transaction_id.as_deref().unwrap_or("n/a"),
        );

        self.mailer
            .send(&payment.user_email, &subject, &body)
            .await
            .map_err(HandlerError::transient)?;

        self.store.insert(Notification {
            notification_id: Uuid::new_v4().to_string(),
            order_id: payment.order_id,
            to: payment.user_email.clone(),
            template_id: RECEIPT_TEMPLATE.to_string(),
            sent_at: Utc::now(),
        });

        tracing::info!(
            order_id = payment.order_id,
            to = %payment.user_email,
            "Payment confirmation sent"
        );
        Ok(())
    }
}
