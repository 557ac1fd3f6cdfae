//! Core types for the circuitbridge library.
//!
//! - [`types`] - `CircuitState` and the monotonic millisecond clock
//! - [`error`] - Outcome kinds delivered to fallbacks and build errors

pub mod error;
pub mod types;

pub use error::{BreakerError, CommandError, ConfigError, ConfigResult};
pub use types::{CircuitState, MonotonicClock};
