//! Shared helpers for integration tests.

#![allow(dead_code)]

use circuitbridge::{BreakerError, CircuitBreakerConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collects every outcome delivered to a fallback.
#[derive(Clone, Default)]
pub struct Recorder {
    outcomes: Arc<Mutex<Vec<BreakerError>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fallback that records into this recorder.
    pub fn fallback<F>(&self) -> impl Fn(BreakerError, F) + Send + Sync + 'static {
        let outcomes = Arc::clone(&self.outcomes);
        move |error: BreakerError, _: F| outcomes.lock().unwrap().push(error)
    }

    pub fn outcomes(&self) -> Vec<BreakerError> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }
}

/// Short durations so tests finish quickly.
pub fn fast_config(max_failures: usize) -> CircuitBreakerConfig {
    CircuitBreakerConfig::new()
        .with_name("integration")
        .with_timeout(Duration::from_millis(100))
        .with_reset_timeout(Duration::from_millis(150))
        .with_max_failures(max_failures)
        .with_rolling_window(Duration::from_secs(5))
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
