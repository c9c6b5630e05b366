//! Topic-pattern routing fabric
//!
//! Maps a published routing key (the envelope's `event_type`) to the set of
//! bound queues. The table is immutable once built: reconfiguration creates a
//! new version rather than mutating in place, so replays of the same event
//! against the same table version always produce identical fan-out.

use crate::{BrokerError, BrokerResult};

/// Declared interest of a queue in events matching a routing-key pattern.
///
/// Patterns are dot-delimited. `*` matches exactly one segment, `#` matches
/// zero or more trailing segments and is only valid as the final segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub pattern: String,
}

impl Binding {
    pub fn new(queue: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            pattern: pattern.into(),
        }
    }
}

/// Immutable routing table, versioned per reconfiguration.
///
/// Built from a declarative binding list at startup. In-flight messages
/// already enqueued are unaffected by later versions.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    bindings: Vec<Binding>,
    version: u64,
}

impl RoutingTable {
    /// Build a table from a binding list, validating every pattern.
    pub fn new(bindings: Vec<Binding>) -> BrokerResult<Self> {
        for binding in &bindings {
            validate_pattern(&binding.pattern)?;
        }
        Ok(Self {
            bindings,
            version: 1,
        })
    }

    /// Derive a new table version with one more binding.
    pub fn with_binding(&self, binding: Binding) -> BrokerResult<Self> {
        validate_pattern(&binding.pattern)?;
        let mut bindings = self.bindings.clone();
        bindings.push(binding);
        Ok(Self {
            bindings,
            version: self.version + 1,
        })
    }

    /// Derive a new table version without any bindings for `queue`.
    pub fn without_queue(&self, queue: &str) -> Self {
        Self {
            bindings: self
                .bindings
                .iter()
                .filter(|b| b.queue != queue)
                .cloned()
                .collect(),
            version: self.version + 1,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Compute the queues an event of `event_type` fans out to.
    ///
    /// A queue appears at most once even if several of its bindings match
    /// (first match per queue wins). Pure function of the table and the
    /// event type; no hidden state.
    pub fn route(&self, event_type: &str) -> Vec<&str> {
        let mut queues: Vec<&str> = Vec::new();
        for binding in &self.bindings {
            if queues.contains(&binding.queue.as_str()) {
                continue;
            }
            if matches_pattern(event_type, &binding.pattern) {
                queues.push(&binding.queue);
            }
        }
        queues
    }
}

/// Check a dot-delimited event type against a binding pattern.
///
/// - `*` matches exactly one segment
/// - `#` matches zero or more trailing segments
///
/// # Examples
/// - `order.*` matches `order.created`, not `order.item.added`
/// - `order.#` matches `order`, `order.created`, `order.item.added`
/// - `*.created` matches `order.created`, not `created`
fn matches_pattern(event_type: &str, pattern: &str) -> bool {
    let type_segments: Vec<&str> = event_type.split('.').collect();
    let pattern_segments: Vec<&str> = pattern.split('.').collect();

    let mut t_idx = 0;
    let mut p_idx = 0;

    while p_idx < pattern_segments.len() {
        let pattern_segment = pattern_segments[p_idx];

        if pattern_segment == "#" {
            // `#` swallows all remaining segments, including none
            return true;
        }

        if t_idx >= type_segments.len() {
            // Pattern has segments left but the event type is exhausted
            return false;
        }

        if pattern_segment == "*" || pattern_segment == type_segments[t_idx] {
            t_idx += 1;
            p_idx += 1;
        } else {
            return false;
        }
    }

    // Both must be exhausted for a full match
    t_idx == type_segments.len()
}

/// Validate a binding pattern at table-construction time.
///
/// Rejects empty segments and `#` anywhere but the final position. An
/// unmatched-but-valid pattern is a configuration smell, not an error.
fn validate_pattern(pattern: &str) -> BrokerResult<()> {
    if pattern.is_empty() {
        return Err(BrokerError::InvalidPattern("empty pattern".to_string()));
    }

    let segments: Vec<&str> = pattern.split('.').collect();
    for (idx, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(BrokerError::InvalidPattern(format!(
                "empty segment in pattern: {pattern}"
            )));
        }
        if *segment == "#" && idx != segments.len() - 1 {
            return Err(BrokerError::InvalidPattern(format!(
                "'#' must be the final segment: {pattern}"
            )));
        }
    }

    Ok(())
}
