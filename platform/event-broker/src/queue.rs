//! Durable queue with visibility-timeout delivery semantics
//!
//! Each logical consumer group owns one queue. A message in a queue is always
//! in exactly one of three places:
//!
//! - **ready/delayed**: visible (now or after a backoff delay) to the next
//!   `dequeue` call
//! - **in-flight**: leased to one consumer, invisible to others until acked,
//!   nacked, or the visibility timeout expires
//! - **dead-letter sink**: terminal, after `max_attempts` deliveries or a
//!   permanent nack
//!
//! Crash-only consumers are tolerated without heartbeats: an unacked lease
//! simply expires and the message becomes visible again with its attempt
//! counter advanced.

use crate::dead_letter::DeadLetterSink;
use crate::retry::{backoff_delay, RetryConfig};
use crate::{BrokerError, BrokerResult, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Per-queue delivery configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a dequeued message stays invisible before redelivery
    pub visibility_timeout: Duration,
    /// Redelivery attempt limit and backoff shape
    pub retry: RetryConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

/// Opaque lease token returned by `dequeue`, consumed by `ack`/`nack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckToken(Uuid);

/// A leased message: the payload plus the token needed to settle it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub ack_token: AckToken,
}

#[derive(Debug)]
struct Scheduled {
    message: Message,
    not_before: Instant,
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Visible now, FIFO in arrival order
    ready: VecDeque<Message>,
    /// Waiting out a redelivery backoff
    delayed: Vec<Scheduled>,
    /// Leased to a consumer, keyed by ack token
    in_flight: HashMap<Uuid, InFlight>,
}

/// At-least-once delivery buffer for one consumer group.
///
/// FIFO is preserved for messages that never fail; redelivered messages
/// re-enter behind their backoff delay, so cross-message order is not
/// guaranteed once retries are involved (consumers must not assume it).
#[derive(Debug)]
pub struct DurableQueue {
    name: String,
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    dead_letters: Arc<DeadLetterSink>,
}

impl DurableQueue {
    pub fn new(name: String, config: QueueConfig, dead_letters: Arc<DeadLetterSink>) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            dead_letters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message. Attempt counter is whatever the message carries
    /// (0 for fresh publishes, reset by dead-letter replay).
    pub fn enqueue(&self, message: Message) {
        {
            let mut state = self.lock_state();
            state.ready.push_back(message);
        }
        self.notify.notify_waiters();
    }

    /// Lease the next visible message, or `None` if the queue has nothing
    /// deliverable right now.
    ///
    /// The lease lasts for the configured visibility timeout; the message's
    /// attempt counter is advanced as part of the lease.
    pub fn try_dequeue(&self) -> Option<Delivery> {
        let mut state = self.lock_state();
        self.sweep(&mut state);

        let mut message = state.ready.pop_front()?;
        message.attempt += 1;

        let token = Uuid::new_v4();
        state.in_flight.insert(
            token,
            InFlight {
                message: message.clone(),
                deadline: Instant::now() + self.config.visibility_timeout,
            },
        );

        Some(Delivery {
            message,
            ack_token: AckToken(token),
        })
    }

    /// Lease the next visible message, waiting up to `max_wait` for one to
    /// become deliverable (new enqueue, backoff elapse, or lease expiry).
    pub async fn dequeue_wait(&self, max_wait: Duration) -> Option<Delivery> {
        let deadline = Instant::now() + max_wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before re-checking state, so an enqueue
            // racing this check cannot be missed
            notified.as_mut().enable();

            if let Some(delivery) = self.try_dequeue() {
                return Some(delivery);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let wake_at = self.next_wake(deadline);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Acknowledge a leased message, removing it permanently.
    pub fn ack(&self, token: &AckToken) -> BrokerResult<()> {
        let mut state = self.lock_state();
        state
            .in_flight
            .remove(&token.0)
            .map(|_| ())
            .ok_or(BrokerError::UnknownAckToken)
    }

    /// Reject a leased message.
    ///
    /// With `requeue` the message is scheduled for redelivery after backoff,
    /// unless its attempts are exhausted, in which case it dead-letters.
    /// Without `requeue` it dead-letters immediately (permanent failure).
    pub fn nack(&self, token: &AckToken, requeue: bool, error: &str) -> BrokerResult<()> {
        let in_flight = {
            let mut state = self.lock_state();
            state
                .in_flight
                .remove(&token.0)
                .ok_or(BrokerError::UnknownAckToken)?
        };

        let message = in_flight.message;

        if !requeue {
            self.dead_letters.push(&self.name, message, error);
            return Ok(());
        }

        if message.attempt >= self.config.retry.max_attempts {
            self.dead_letters.push(&self.name, message, error);
            return Ok(());
        }

        let delay = backoff_delay(message.attempt, &self.config.retry);
        tracing::warn!(
            queue = %self.name,
            event_id = %message.event_id,
            attempt = message.attempt,
            max_attempts = self.config.retry.max_attempts,
            backoff_ms = delay.as_millis(),
            error = %error,
            "Delivery failed, scheduling redelivery with backoff"
        );

        {
            let mut state = self.lock_state();
            state.delayed.push(Scheduled {
                message,
                not_before: Instant::now() + delay,
            });
        }
        self.notify.notify_waiters();

        Ok(())
    }

    /// Messages waiting for delivery (ready + delayed).
    pub fn depth(&self) -> usize {
        let mut state = self.lock_state();
        self.sweep(&mut state);
        state.ready.len() + state.delayed.len()
    }

    /// Messages currently leased to consumers.
    pub fn in_flight_count(&self) -> usize {
        let mut state = self.lock_state();
        self.sweep(&mut state);
        state.in_flight.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move due delayed messages to ready and reap expired leases.
    ///
    /// An expired lease counts as a failed attempt: the message either goes
    /// back behind a backoff delay or, if exhausted, to the dead-letter sink.
    fn sweep(&self, state: &mut QueueState) {
        let now = Instant::now();

        if !state.delayed.is_empty() {
            let mut due: Vec<Scheduled> = Vec::new();
            let mut waiting: Vec<Scheduled> = Vec::new();
            for scheduled in state.delayed.drain(..) {
                if scheduled.not_before <= now {
                    due.push(scheduled);
                } else {
                    waiting.push(scheduled);
                }
            }
            due.sort_by_key(|s| s.not_before);
            for scheduled in due {
                state.ready.push_back(scheduled.message);
            }
            state.delayed = waiting;
        }

        let expired: Vec<Uuid> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(token, _)| *token)
            .collect();

        for token in expired {
            let Some(in_flight) = state.in_flight.remove(&token) else {
                continue;
            };
            let message = in_flight.message;

            if message.attempt >= self.config.retry.max_attempts {
                self.dead_letters
                    .push(&self.name, message, "visibility timeout expired");
                continue;
            }

            let delay = backoff_delay(message.attempt, &self.config.retry);
            tracing::warn!(
                queue = %self.name,
                event_id = %message.event_id,
                attempt = message.attempt,
                backoff_ms = delay.as_millis(),
                "Visibility timeout expired, message returns after backoff"
            );
            state.delayed.push(Scheduled {
                message,
                not_before: now + delay,
            });
        }
    }

    /// Earliest instant at which waiting state can change on its own.
    fn next_wake(&self, deadline: Instant) -> Instant {
        let state = self.lock_state();
        let mut wake = deadline;
        for scheduled in &state.delayed {
            wake = wake.min(scheduled.not_before);
        }
        for in_flight in state.in_flight.values() {
            wake = wake.min(in_flight.deadline);
        }
        wake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(event_type: &str, correlation_id: &str) -> Message {
        Message {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            correlation_id: correlation_id.to_string(),
            payload: b"{}".to_vec(),
            attempt: 0,
        }
    }

    fn queue(visibility: Duration, max_attempts: u32) -> DurableQueue {
        DurableQueue::new(
            "test-queue".to_string(),
            QueueConfig {
                visibility_timeout: visibility,
                retry: RetryConfig {
                    max_attempts,
                    initial_backoff: Duration::from_millis(100),
                    max_backoff: Duration::from_secs(5),
                },
            },
            Arc::new(DeadLetterSink::new()),
        )
    }

    #[tokio::test]
    async fn test_fifo_order_and_attempt_counting() {
        let q = queue(Duration::from_secs(30), 5);
        q.enqueue(message("order.created", "ORD-1"));
        q.enqueue(message("order.created", "ORD-2"));

        let first = q.try_dequeue().unwrap();
        let second = q.try_dequeue().unwrap();
        assert_eq!(first.message.correlation_id, "ORD-1");
        assert_eq!(second.message.correlation_id, "ORD-2");
        assert_eq!(first.message.attempt, 1);
        assert!(q.try_dequeue().is_none());
        assert_eq!(q.in_flight_count(), 2);
    }

    #[tokio::test]
    async fn test_ack_settles_lease() {
        let q = queue(Duration::from_secs(30), 5);
        q.enqueue(message("order.created", "ORD-1"));

        let delivery = q.try_dequeue().unwrap();
        q.ack(&delivery.ack_token).unwrap();
        assert_eq!(q.in_flight_count(), 0);
        assert_eq!(q.depth(), 0);

        // Double-ack is an error (lease already settled)
        assert!(matches!(
            q.ack(&delivery.ack_token),
            Err(BrokerError::UnknownAckToken)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_timeout_redelivers() {
        let q = queue(Duration::from_secs(5), 5);
        let msg = message("order.created", "ORD-1");
        let event_id = msg.event_id;
        q.enqueue(msg);

        // Consumer crashes mid-processing: lease never settled
        let delivery = q.try_dequeue().unwrap();
        assert_eq!(delivery.message.attempt, 1);
        assert!(q.try_dequeue().is_none());

        // Lease expires, then the backoff (attempt 1: <200ms) elapses
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::time::advance(Duration::from_millis(200)).await;

        let redelivered = q.try_dequeue().unwrap();
        assert_eq!(redelivered.message.event_id, event_id);
        assert_eq!(redelivered.message.attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_requeue_applies_backoff() {
        let q = queue(Duration::from_secs(30), 5);
        q.enqueue(message("order.created", "ORD-1"));

        let delivery = q.try_dequeue().unwrap();
        q.nack(&delivery.ack_token, true, "downstream 503").unwrap();

        // Invisible during the backoff window
        assert!(q.try_dequeue().is_none());

        // attempt 1 backoff is within [100, 200)ms
        tokio::time::advance(Duration::from_millis(200)).await;
        let redelivered = q.try_dequeue().unwrap();
        assert_eq!(redelivered.message.attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_after_exactly_max_attempts() {
        let q = queue(Duration::from_secs(30), 3);
        let msg = message("order.created", "ORD-1");
        let event_id = msg.event_id;
        q.enqueue(msg);

        for attempt in 1..=3u32 {
            tokio::time::advance(Duration::from_secs(6)).await;
            let delivery = q.dequeue_wait(Duration::from_secs(1)).await.unwrap();
            assert_eq!(delivery.message.attempt, attempt);
            q.nack(&delivery.ack_token, true, "still failing").unwrap();
        }

        // Third failed attempt exhausted the budget
        assert_eq!(q.depth(), 0);
        let dead = q.dead_letters.list();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].event_id, event_id);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].last_error, "still failing");
    }

    #[tokio::test]
    async fn test_permanent_nack_dead_letters_immediately() {
        let q = queue(Duration::from_secs(30), 5);
        q.enqueue(message("order.created", "ORD-1"));

        let delivery = q.try_dequeue().unwrap();
        q.nack(&delivery.ack_token, false, "malformed payload")
            .unwrap();

        assert_eq!(q.depth(), 0);
        let dead = q.dead_letters.list();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 1);
        assert_eq!(dead[0].last_error, "malformed payload");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wait_wakes_on_enqueue() {
        let q = Arc::new(queue(Duration::from_secs(30), 5));

        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.dequeue_wait(Duration::from_secs(10)).await })
        };
        tokio::task::yield_now().await;

        q.enqueue(message("order.created", "ORD-1"));
        let delivery = waiter.await.unwrap();
        assert!(delivery.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_wait_times_out_empty() {
        let q = queue(Duration::from_secs(30), 5);
        let result = q.dequeue_wait(Duration::from_millis(50)).await;
        assert!(result.is_none());
    }
}
