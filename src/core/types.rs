//! Common types shared across the library.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// The state of a circuit breaker.
///
/// Exactly one value is current per breaker; it only changes under the
/// breaker's state lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through; failures are recorded.
    #[default]
    Closed,
    /// Probing; a limited number of requests are let through.
    HalfOpen,
    /// Requests fail fast until the reset timer fires.
    Open,
}

impl CircuitState {
    /// Returns `true` if the circuit is closed.
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }

    /// Returns `true` if the circuit is open.
    pub fn is_open(self) -> bool {
        self == Self::Open
    }

    /// Returns `true` if the circuit is half-open.
    pub fn is_half_open(self) -> bool {
        self == Self::HalfOpen
    }

    /// Returns the name of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A monotonic millisecond clock anchored at its creation.
///
/// Failure timestamps come from here rather than the wall clock so that
/// clock adjustments cannot shrink or invert a failure span.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Starts a new clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the clock was created.
    pub fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_default() {
        assert!(CircuitState::default().is_closed());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CircuitState::Closed.name(), "closed");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(CircuitState::Open.name(), "open");
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"half_open\"");
    }

    #[test]
    fn test_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.now_millis() >= a + 5);
    }
}
