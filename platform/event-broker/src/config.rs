//! Broker configuration parsed from environment variables
//!
//! Delivery tunables are deployment configuration, not hard-coded constants.

use crate::retry::RetryConfig;
use crate::routing::Binding;
use std::env;
use std::time::Duration;

/// Broker-wide configuration. Defaults: 30s visibility, 5 attempts,
/// 200ms to 30s doubling backoff, 1s forwarder tick.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub visibility_timeout: Duration,
    pub retry: RetryConfig,
    /// Outbox forwarder poll interval
    pub forwarder_interval: Duration,
    /// Declarative startup bindings
    pub bindings: Vec<Binding>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            forwarder_interval: Duration::from_secs(1),
            bindings: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// `BINDINGS` is a `;`-separated list of `queue=pattern` pairs, e.g.
    /// `payments.order-created=order.*;notifications.payment-processed=payment.#`.
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let visibility_timeout = parse_millis(
            "VISIBILITY_TIMEOUT_MS",
            defaults.visibility_timeout,
        )?;
        let max_attempts = match env::var("MAX_ATTEMPTS") {
            Ok(v) => v
                .parse::<u32>()
                .map_err(|_| "MAX_ATTEMPTS must be a valid u32".to_string())?,
            Err(_) => defaults.retry.max_attempts,
        };
        let initial_backoff = parse_millis("INITIAL_BACKOFF_MS", defaults.retry.initial_backoff)?;
        let max_backoff = parse_millis("MAX_BACKOFF_MS", defaults.retry.max_backoff)?;
        let forwarder_interval =
            parse_millis("FORWARDER_INTERVAL_MS", defaults.forwarder_interval)?;

        let bindings = match env::var("BINDINGS") {
            Ok(raw) => parse_bindings(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            visibility_timeout,
            retry: RetryConfig {
                max_attempts,
                initial_backoff,
                max_backoff,
            },
            forwarder_interval,
            bindings,
        })
    }
}

fn parse_millis(var: &str, default: Duration) -> Result<Duration, String> {
    match env::var(var) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| format!("{var} must be a valid integer of milliseconds")),
        Err(_) => Ok(default),
    }
}

/// Parse a declarative `queue=pattern` binding list.
pub fn parse_bindings(raw: &str) -> Result<Vec<Binding>, String> {
    let mut bindings = Vec::new();
    for pair in raw.split(';').filter(|p| !p.trim().is_empty()) {
        let (queue, pattern) = pair
            .split_once('=')
            .ok_or_else(|| format!("binding must be queue=pattern, got: {pair}"))?;
        let queue = queue.trim();
        let pattern = pattern.trim();
        if queue.is_empty() || pattern.is_empty() {
            return Err(format!("binding must be queue=pattern, got: {pair}"));
        }
        bindings.push(Binding::new(queue, pattern));
    }
    Ok(bindings)
}
