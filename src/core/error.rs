//! Error types for the circuitbridge library.
//!
//! Two families of errors exist:
//!
//! - [`BreakerError`] describes *why a run did not succeed*. It is never
//!   returned from [`CircuitBreaker::run`](crate::CircuitBreaker::run);
//!   it is handed to the fallback instead.
//! - [`ConfigError`] is returned when a breaker cannot be built.

use std::time::Duration;
use thiserror::Error;

/// The outcome kind delivered to a fallback for every non-successful run.
///
/// Every run that does not succeed produces exactly one `BreakerError`,
/// and the fallback is invoked exactly once with it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BreakerError {
    /// The command did not resolve before its deadline.
    #[error("command timed out after {elapsed:?}")]
    Timeout {
        /// The configured deadline that elapsed.
        elapsed: Duration,
    },

    /// The circuit is open; the command was never attempted.
    #[error("circuit is open, failing fast")]
    FastFail {
        /// Time left until the breaker probes again, if known.
        remaining: Option<Duration>,
    },

    /// The command reported a failure.
    #[error("command failed: {reason}")]
    Invocation {
        /// Application-supplied reason.
        reason: String,
    },

    /// The command panicked while executing.
    #[error("command panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// A probe failed while the circuit was half-open; the circuit reopened.
    #[error("half-open probe failed: {cause}")]
    HalfOpenProbeFailure {
        /// The failure observed by the probe.
        #[source]
        cause: Box<BreakerError>,
    },
}

impl BreakerError {
    /// Creates a `Timeout` error.
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout { elapsed }
    }

    /// Creates a `FastFail` error with no recovery hint.
    pub fn fast_fail() -> Self {
        Self::FastFail { remaining: None }
    }

    /// Creates an `Invocation` error.
    pub fn invocation(reason: impl Into<String>) -> Self {
        Self::Invocation {
            reason: reason.into(),
        }
    }

    /// Wraps `cause` as a half-open probe failure.
    ///
    /// Already-wrapped errors are returned unchanged.
    pub fn half_open_probe(cause: BreakerError) -> Self {
        match cause {
            wrapped @ Self::HalfOpenProbeFailure { .. } => wrapped,
            other => Self::HalfOpenProbeFailure {
                cause: Box::new(other),
            },
        }
    }

    /// Returns `true` if the command timed out (directly or while probing).
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), Self::Timeout { .. })
    }

    /// Returns `true` if the run was rejected without invoking the command.
    pub fn is_fast_fail(&self) -> bool {
        matches!(self, Self::FastFail { .. })
    }

    /// Returns `true` if this outcome is recorded in the failure window.
    pub fn counts_as_failure(&self) -> bool {
        !self.is_fast_fail()
    }

    /// Returns the innermost error, unwrapping half-open probe failures.
    pub fn root_cause(&self) -> &BreakerError {
        match self {
            Self::HalfOpenProbeFailure { cause } => cause.root_cause(),
            other => other,
        }
    }

    /// Short stable name of this kind, used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::FastFail { .. } => "fast_fail",
            Self::Invocation { .. } => "invocation",
            Self::Panicked { .. } => "panicked",
            Self::HalfOpenProbeFailure { .. } => "half_open_probe_failure",
        }
    }
}

/// Errors raised while building a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No command was supplied to the builder.
    #[error("a command is required")]
    MissingCommand,

    /// No fallback was supplied to the builder.
    #[error("a fallback is required")]
    MissingFallback,

    /// A configuration value is out of range.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The breaker was built outside of a Tokio runtime.
    #[error("no Tokio runtime available: {message}")]
    NoRuntime {
        /// Message from the runtime lookup.
        message: String,
    },
}

impl ConfigError {
    /// Creates an `InvalidValue` error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for breaker construction.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The error type a direct or async command may fail with.
pub type CommandError = Box<dyn std::error::Error + Send + Sync + 'static>;
