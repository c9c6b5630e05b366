//! Dead-letter sink
//!
//! Terminal storage for messages that exhausted their delivery attempts or
//! failed permanently. Nothing is silently dropped: every message that leaves
//! a queue without an ack either lands here or is redelivered.

use crate::Message;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

/// A dead-lettered message with enough context for operator triage.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event_id: Uuid,
    pub event_type: String,
    /// Queue the message was consumed from (replay target)
    pub queue: String,
    pub correlation_id: String,
    /// Delivery attempts made before dead-lettering
    pub attempts: u32,
    pub last_error: String,
    /// Full serialized envelope
    pub payload: Vec<u8>,
    pub failed_at: DateTime<Utc>,
}

/// Shared terminal store for failed messages.
///
/// Read side is the operator inspection listing; the only write paths are the
/// queues (on exhaustion / permanent nack) and replay removal.
#[derive(Debug, Default)]
pub struct DeadLetterSink {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed message. Called by queues, never by handlers.
    pub fn push(&self, queue: &str, message: Message, last_error: &str) {
        tracing::error!(
            event_id = %message.event_id,
            event_type = %message.event_type,
            queue = %queue,
            correlation_id = %message.correlation_id,
            attempts = message.attempt,
            error = %last_error,
            "Event moved to dead-letter sink"
        );

        let entry = DeadLetter {
            event_id: message.event_id,
            event_type: message.event_type,
            queue: queue.to_string(),
            correlation_id: message.correlation_id,
            attempts: message.attempt,
            last_error: last_error.to_string(),
            payload: message.payload,
            failed_at: Utc::now(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }

    /// Read-only listing for operator tooling.
    pub fn list(&self) -> Vec<DeadLetter> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove an entry for replay. Returns `None` if the event is not here.
    pub fn take(&self, event_id: Uuid) -> Option<DeadLetter> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let idx = entries.iter().position(|e| e.event_id == event_id)?;
        Some(entries.remove(idx))
    }
}
