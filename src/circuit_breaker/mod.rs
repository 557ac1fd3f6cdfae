//! Circuit breaker for arbitrary commands.
//!
//! The circuit breaker pattern prevents cascading failures by temporarily
//! stopping calls to a failing dependency and periodically probing it to
//! detect recovery.
//!
//! ## States
//!
//! - **Closed**: Normal operation; runs are dispatched.
//! - **Open**: The dependency is failing; runs fail fast.
//! - **Half-Open**: Probing the dependency to see if it has recovered.
//!
//! ## Commands
//!
//! A [`Command`] is either a blocking function, an async function, or a
//! function handed an [`Invocation`] through which it reports its outcome
//! later. Every dispatched run races a timeout; exactly one outcome is
//! recorded per run.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use circuitbridge::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let config = CircuitBreakerConfig::default()
//!     .with_max_failures(5)
//!     .with_rolling_window(Duration::from_secs(10))
//!     .with_reset_timeout(Duration::from_secs(30));
//!
//! let breaker = CircuitBreaker::builder()
//!     .with_config(config)
//!     .future(|id: u64| async move { fetch(id).await.map_err(Into::into) })
//!     .fallback(|error, id: u64| tracing::warn!(id, %error, "fetch skipped"))
//!     .build()?;
//! ```

mod breaker;
mod command;
mod config;
mod invocation;

pub use breaker::{CircuitBreaker, CircuitBreakerBuilder};
pub use command::{Command, Fallback};
pub use config::CircuitBreakerConfig;
pub use invocation::Invocation;
