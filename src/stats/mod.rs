//! Failure and latency bookkeeping.
//!
//! - [`FailureWindow`] decides whether recent failures are dense enough to trip.
//! - [`LatencyStats`] counts outcomes and keeps latency samples for monitoring.

mod failures;
mod latency;

pub use failures::FailureWindow;
pub use latency::{
    LatencyPercentiles, LatencyStats, StatsSnapshot, DEFAULT_SAMPLE_CAPACITY, PERCENTILES,
};
