//! Breaker event types and emission functions.

use crate::core::{BreakerError, CircuitState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Base trait for breaker events.
pub trait BreakerEvent: Serialize {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;

    /// Returns the timestamp of the event.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// A change of circuit state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Name of the breaker.
    pub breaker: String,

    /// State before the transition.
    pub from: CircuitState,

    /// State after the transition.
    pub to: CircuitState,

    /// What caused the transition.
    pub reason: String,
}

impl TransitionEvent {
    /// Creates a transition event stamped with the current time.
    pub fn new(
        breaker: impl Into<String>,
        from: CircuitState,
        to: CircuitState,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            breaker: breaker.into(),
            from,
            to,
            reason: reason.into(),
        }
    }
}

impl BreakerEvent for TransitionEvent {
    fn event_type(&self) -> &'static str {
        "state_transition"
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A run that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Name of the breaker.
    pub breaker: String,

    /// Run identifier, absent for breaker-level notifications and fast-fails.
    pub call_id: Option<Uuid>,

    /// Outcome kind, as returned by [`BreakerError::kind`].
    pub kind: String,

    /// Human readable outcome.
    pub message: String,
}

impl OutcomeEvent {
    /// Creates an outcome event for `error`.
    pub fn new(breaker: impl Into<String>, call_id: Option<Uuid>, error: &BreakerError) -> Self {
        Self {
            timestamp: Utc::now(),
            breaker: breaker.into(),
            call_id,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

impl BreakerEvent for OutcomeEvent {
    fn event_type(&self) -> &'static str {
        "outcome"
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Emits a state transition event.
pub fn emit_state_transition(event: &TransitionEvent) {
    if event.to.is_open() {
        tracing::warn!(
            target: "circuitbridge::events",
            event_type = event.event_type(),
            breaker = %event.breaker,
            from = %event.from,
            to = %event.to,
            reason = %event.reason,
            timestamp = %event.timestamp.to_rfc3339(),
            "Circuit opened"
        );
    } else {
        tracing::info!(
            target: "circuitbridge::events",
            event_type = event.event_type(),
            breaker = %event.breaker,
            from = %event.from,
            to = %event.to,
            reason = %event.reason,
            timestamp = %event.timestamp.to_rfc3339(),
            "Circuit state changed"
        );
    }
}

/// Emits an event for a run rejected while the circuit is open.
pub fn emit_fast_fail(breaker: &str, remaining: Option<Duration>) {
    tracing::debug!(
        target: "circuitbridge::events",
        event_type = "fast_fail",
        breaker = %breaker,
        remaining_ms = remaining.map(|r| r.as_millis() as u64),
        "Circuit open, failing fast"
    );
}

/// Emits an event for a run whose deadline passed.
pub fn emit_timeout(breaker: &str, call_id: Uuid, timeout: Duration) {
    tracing::warn!(
        target: "circuitbridge::events",
        event_type = "timeout",
        breaker = %breaker,
        call_id = %call_id,
        timeout_ms = timeout.as_millis() as u64,
        "Command timed out"
    );
}

/// Emits an event for a failed run.
pub fn emit_failure(event: &OutcomeEvent, failures: usize) {
    tracing::debug!(
        target: "circuitbridge::events",
        event_type = event.event_type(),
        breaker = %event.breaker,
        call_id = ?event.call_id,
        kind = %event.kind,
        failures,
        timestamp = %event.timestamp.to_rfc3339(),
        "{}",
        event.message
    );
}
