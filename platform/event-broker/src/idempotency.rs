//! Idempotency guard
//!
//! At-least-once delivery means every consumer must tolerate redelivery. The
//! ledger records (consumer_group, event_id) pairs after the first successful
//! processing; consulted before processing, it turns duplicates into no-ops
//! so redelivery behaves like effectively-once from the business side.
//!
//! Entries are append-only: once written they are never mutated, only pruned
//! after a retention window longer than any plausible redelivery window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// One processed-event record.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub consumer_group: String,
    pub event_id: Uuid,
    pub outcome: String,
    pub processed_at: DateTime<Utc>,
}

/// Processed-event ledger, one logical table per deployment keyed by
/// (consumer_group, event_id).
///
/// Implementations back this with the consumer's own local store so the
/// domain mutation and the ledger write share a transaction boundary; the
/// in-memory implementation serves tests and the in-process pipeline.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Has this consumer group already processed this event?
    async fn already_processed(&self, consumer_group: &str, event_id: Uuid) -> bool;

    /// Record a completed processing. Inserting an existing pair is a no-op
    /// (the first writer wins, matching a unique-constraint upsert).
    async fn record_processed(&self, consumer_group: &str, event_id: Uuid, outcome: &str);
}

/// In-memory ledger for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: Mutex<HashMap<(String, Uuid), LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a recorded entry, mainly for assertions in tests.
    pub fn entry(&self, consumer_group: &str, event_id: Uuid) -> Option<LedgerEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&(consumer_group.to_string(), event_id))
            .cloned()
    }

    /// Garbage-collect entries older than `cutoff`. Safe only when the cutoff
    /// exceeds the maximum plausible redelivery window.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.processed_at >= cutoff);
        before - entries.len()
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn already_processed(&self, consumer_group: &str, event_id: Uuid) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(&(consumer_group.to_string(), event_id))
    }

    async fn record_processed(&self, consumer_group: &str, event_id: Uuid, outcome: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry((consumer_group.to_string(), event_id))
            .or_insert_with(|| {
                tracing::debug!(
                    consumer_group = %consumer_group,
                    event_id = %event_id,
                    outcome = %outcome,
                    "Event marked as processed"
                );
                LedgerEntry {
                    consumer_group: consumer_group.to_string(),
                    event_id,
                    outcome: outcome.to_string(),
                    processed_at: Utc::now(),
                }
            });
    }
}
