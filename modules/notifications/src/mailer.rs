//! Mail relay seam

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("mail relay error: {0}")]
pub struct MailerError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError>;
}

/// Mock relay for development and testing.
///
/// `fail_next(n)` scripts an outage for the next `n` sends.
#[derive(Debug, Default)]
pub struct MockMailer {
    sent: Mutex<Vec<(String, String)>>,
    failures_remaining: AtomicU32,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        let sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.len()
    }

    pub fn sent_to(&self) -> Vec<String> {
        let sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.iter().map(|(to, _)| to.clone()).collect()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), MailerError> {
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MailerError("relay connection refused".to_string()));
        }

        tracing::info!(to = %to, subject = %subject, "Mock notification sent");
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push((to.to_string(), subject.to_string()));
        Ok(())
    }
}
