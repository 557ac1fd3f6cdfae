//! Circuit breaker configuration.

use crate::core::{ConfigError, ConfigResult};
use crate::stats::DEFAULT_SAMPLE_CAPACITY;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a circuit breaker.
///
/// Durations serialize as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Breaker name, used in logs and Hystrix snapshots.
    pub name: String,

    /// Optional Hystrix group.
    pub group: Option<String>,

    /// Deadline for a single command execution.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// How long the circuit stays open before probing.
    #[serde(with = "duration_ms")]
    pub reset_timeout: Duration,

    /// Number of failures within `rolling_window` that trips the circuit.
    pub max_failures: usize,

    /// Time span the last `max_failures` failures must fit in to trip.
    #[serde(with = "duration_ms")]
    pub rolling_window: Duration,

    /// Maximum concurrently executing commands; 0 disables bulkheading.
    pub bulkhead: usize,

    /// Maximum concurrent probes while half-open.
    pub half_open_max_probes: u32,

    /// Latency samples retained per latency list.
    pub latency_sample_capacity: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "circuitbridge".to_string(),
            group: None,
            timeout: Duration::from_millis(1000),
            reset_timeout: Duration::from_millis(60_000),
            max_failures: 5,
            rolling_window: Duration::from_millis(10_000),
            bulkhead: 0,
            half_open_max_probes: 1,
            latency_sample_capacity: DEFAULT_SAMPLE_CAPACITY,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the breaker name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the Hystrix group.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the open → half-open delay.
    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    /// Sets the trip threshold count.
    pub fn with_max_failures(mut self, max_failures: usize) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Sets the trip threshold time span.
    pub fn with_rolling_window(mut self, rolling_window: Duration) -> Self {
        self.rolling_window = rolling_window;
        self
    }

    /// Sets the bulkhead limit (0 disables it).
    pub fn with_bulkhead(mut self, limit: usize) -> Self {
        self.bulkhead = limit;
        self
    }

    /// Sets the maximum number of concurrent half-open probes.
    pub fn with_half_open_max_probes(mut self, max: u32) -> Self {
        self.half_open_max_probes = max;
        self
    }

    /// Sets how many latency samples are kept.
    pub fn with_latency_sample_capacity(mut self, capacity: usize) -> Self {
        self.latency_sample_capacity = capacity;
        self
    }

    /// Creates a configuration that trips early and recovers slowly.
    ///
    /// - Trips after 3 failures within 30 seconds
    /// - Stays open for 2 minutes
    pub fn strict() -> Self {
        Self {
            max_failures: 3,
            rolling_window: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(120),
            ..Self::default()
        }
    }

    /// Creates a configuration tolerant of bursts of failures.
    ///
    /// - Trips after 20 failures within 5 seconds
    /// - Stays open for 10 seconds and admits 3 probes
    pub fn high_availability() -> Self {
        Self {
            max_failures: 20,
            rolling_window: Duration::from_secs(5),
            reset_timeout: Duration::from_secs(10),
            half_open_max_probes: 3,
            ..Self::default()
        }
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_failures == 0 {
            return Err(ConfigError::invalid("max_failures", "must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be greater than zero"));
        }
        if self.half_open_max_probes == 0 {
            return Err(ConfigError::invalid(
                "half_open_max_probes",
                "must be at least 1",
            ));
        }
        if self.latency_sample_capacity == 0 {
            return Err(ConfigError::invalid(
                "latency_sample_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    pub(crate) fn rolling_window_millis(&self) -> u64 {
        u64::try_from(self.rolling_window.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Serde helper for millisecond durations.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
