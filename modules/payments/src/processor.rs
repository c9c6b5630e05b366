//! Payment gateway seam
//!
//! The external processor keeps its own idempotency keyed by the order, not
//! by the event id: a redelivered event retried after an ambiguous timeout
//! presents the same key and can never double-charge.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Outcome of a successful capture.
#[derive(Debug, Clone)]
pub struct GatewayCapture {
    pub transaction_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The processor rejected the charge; retrying the same charge cannot
    /// succeed. A domain outcome, not a pipeline failure.
    #[error("payment declined: {0}")]
    Declined(String),

    /// The call timed out with unknown effect. Must be retried with the same
    /// idempotency key; never classified as success or permanent failure.
    #[error("gateway call timed out with unknown outcome")]
    AmbiguousTimeout,

    /// The processor was unreachable; nothing was charged.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Capture a charge. `idempotency_key` is stable across retries of the
    /// same order.
    async fn capture(
        &self,
        idempotency_key: &str,
        amount_minor: i64,
        currency: &str,
    ) -> Result<GatewayCapture, GatewayError>;
}

/// Mock gateway for development and testing.
///
/// Behaviors:
/// - An idempotency key already captured returns the original capture
///   (processor-side dedup), regardless of scripted failures
/// - `decline_key` marks a key that is always declined
/// - `ambiguous_timeouts(n)` makes the next `n` captures charge successfully
///   but report a timeout, the worst-case ambiguous outcome
/// - `outages(n)` makes the next `n` calls fail cleanly without charging
#[derive(Debug, Default)]
pub struct MockGateway {
    captured: Mutex<HashMap<String, GatewayCapture>>,
    declined_keys: Mutex<Vec<String>>,
    ambiguous_remaining: AtomicU32,
    outage_remaining: AtomicU32,
    capture_calls: AtomicU32,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decline_key(&self, key: &str) {
        let mut declined = self.declined_keys.lock().unwrap_or_else(|e| e.into_inner());
        declined.push(key.to_string());
    }

    pub fn ambiguous_timeouts(&self, n: u32) {
        self.ambiguous_remaining.store(n, Ordering::SeqCst);
    }

    pub fn outages(&self, n: u32) {
        self.outage_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of capture calls made (including failed and deduped ones).
    pub fn capture_calls(&self) -> u32 {
        self.capture_calls.load(Ordering::SeqCst)
    }

    /// Number of distinct charges actually made.
    pub fn charges(&self) -> usize {
        let captured = self.captured.lock().unwrap_or_else(|e| e.into_inner());
        captured.len()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn capture(
        &self,
        idempotency_key: &str,
        amount_minor: i64,
        currency: &str,
    ) -> Result<GatewayCapture, GatewayError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);

        // Processor-side idempotency wins over everything else
        {
            let captured = self.captured.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = captured.get(idempotency_key) {
                tracing::info!(
                    idempotency_key = %idempotency_key,
                    transaction_id = %existing.transaction_id,
                    "Capture replayed, returning original outcome"
                );
                return Ok(existing.clone());
            }
        }

        {
            let declined = self.declined_keys.lock().unwrap_or_else(|e| e.into_inner());
            if declined.iter().any(|k| k == idempotency_key) {
                return Err(GatewayError::Declined("insufficient funds".to_string()));
            }
        }

        if self
            .outage_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }

        let capture = GatewayCapture {
            transaction_id: format!(
                "TXN-{}",
                &Uuid::new_v4().simple().to_string().to_uppercase()[..12]
            ),
        };

        tracing::info!(
            idempotency_key = %idempotency_key,
            transaction_id = %capture.transaction_id,
            amount_minor,
            currency,
            "Mock capture succeeded"
        );

        {
            let mut captured = self.captured.lock().unwrap_or_else(|e| e.into_inner());
            captured.insert(idempotency_key.to_string(), capture.clone());
        }

        // The charge went through but the caller sees a timeout
        if self
            .ambiguous_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GatewayError::AmbiguousTimeout);
        }

        Ok(capture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_returns_original_capture() {
        let gateway = MockGateway::new();

        let first = gateway.capture("order-1", 1999, "usd").await.unwrap();
        let second = gateway.capture("order-1", 1999, "usd").await.unwrap();

        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(gateway.charges(), 1);
        assert_eq!(gateway.capture_calls(), 2);
    }

    #[tokio::test]
    async fn test_ambiguous_timeout_still_charges_once() {
        let gateway = MockGateway::new();
        gateway.ambiguous_timeouts(1);

        let err = gateway.capture("order-1", 1999, "usd").await.unwrap_err();
        assert!(matches!(err, GatewayError::AmbiguousTimeout));
        // The charge happened despite the timeout
        assert_eq!(gateway.charges(), 1);

        // Retry with the same key resolves without a second charge
        let retry = gateway.capture("order-1", 1999, "usd").await.unwrap();
        assert!(retry.transaction_id.starts_with("TXN-"));
        assert_eq!(gateway.charges(), 1);
    }

    #[tokio::test]
    async fn test_decline_is_stable() {
        let gateway = MockGateway::new();
        gateway.decline_key("order-1");

        for _ in 0..2 {
            let err = gateway.capture("order-1", 1999, "usd").await.unwrap_err();
            assert!(matches!(err, GatewayError::Declined(_)));
        }
        assert_eq!(gateway.charges(), 0);
    }

    #[tokio::test]
    async fn test_outage_charges_nothing() {
        let gateway = MockGateway::new();
        gateway.outages(1);

        let err = gateway.capture("order-1", 1999, "usd").await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert_eq!(gateway.charges(), 0);

        assert!(gateway.capture("order-1", 1999, "usd").await.is_ok());
        assert_eq!(gateway.charges(), 1);
    }
}
