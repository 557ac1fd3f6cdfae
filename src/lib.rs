//! # Circuitbridge
//!
//! A circuit breaker for arbitrary commands, with per-run timeouts,
//! rolling-window failure tracking, an optional bulkhead and
//! Hystrix-compatible monitoring.
//!
//! ## Overview
//!
//! A [`CircuitBreaker`] wraps a command and a fallback:
//!
//! - Every run races a timeout; exactly one outcome is recorded per run
//! - `max_failures` failures within `rolling_window` open the circuit
//! - While open, runs fail fast and the command is never invoked
//! - After `reset_timeout` the breaker probes the command again
//! - Every run that does not succeed invokes the fallback exactly once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use circuitbridge::{BreakerError, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let breaker = CircuitBreaker::builder()
//!         .with_config(
//!             CircuitBreakerConfig::new()
//!                 .with_name("inventory")
//!                 .with_timeout(Duration::from_millis(250)),
//!         )
//!         .future(|sku: String| async move { check_stock(&sku).await.map_err(Into::into) })
//!         .fallback(|error: BreakerError, sku: String| {
//!             eprintln!("stock check for {sku} failed: {error}");
//!         })
//!         .build()?;
//!
//!     breaker.run("A-113".to_string(), "A-113".to_string());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `default` - Includes `hystrix`
//! - `hystrix` - JSON rendering of Hystrix snapshots via `serde_json`
//!
//! ## Architecture
//!
//! - **Core**: Circuit state, outcome kinds and error handling
//! - **Stats**: Failure window and latency statistics
//! - **Bulkhead**: Admission limiting for concurrent commands
//! - **Circuit Breaker**: The state machine, commands and invocations
//! - **Monitor**: Structured events and Hystrix snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bulkhead;
pub mod circuit_breaker;
pub mod core;
pub mod monitor;
pub mod stats;

// Re-export commonly used types at the crate root
pub use crate::core::{BreakerError, CircuitState, CommandError, ConfigError, ConfigResult};

pub use crate::bulkhead::Bulkhead;
pub use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerConfig, Command, Fallback, Invocation,
};
pub use crate::monitor::{HystrixCollector, HystrixMonitor, HystrixProvider, HystrixSnapshot};
pub use crate::stats::{FailureWindow, LatencyPercentiles, LatencyStats, StatsSnapshot};

/// Prelude module for convenient imports.
///
/// ```rust
/// use circuitbridge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, Command, Invocation,
    };
    pub use crate::core::{BreakerError, CircuitState, CommandError, ConfigError};
    pub use crate::monitor::{HystrixCollector, HystrixMonitor, HystrixSnapshot};
    pub use crate::stats::StatsSnapshot;
}
