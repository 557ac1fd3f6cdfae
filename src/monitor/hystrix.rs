//! Hystrix dashboard compatible snapshots.
//!
//! A breaker implements [`HystrixProvider`]. Monitors implementing
//! [`HystrixMonitor`] are handed to the builder and receive a weak handle
//! to every breaker built with them; they never keep a breaker alive.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::core::CircuitState;
use crate::stats::{LatencyPercentiles, StatsSnapshot};

use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};

/// One breaker's metrics in the Hystrix stream format.
///
/// Counters the breaker does not track are reported as zero; the
/// `propertyValue_*` fields are derived from the breaker's configuration
/// where a counterpart exists. Field names follow the Hystrix stream format.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HystrixSnapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub group: String,
    /// Milliseconds since the Unix epoch.
    pub current_time: i64,
    pub is_circuit_breaker_open: bool,
    pub error_percentage: f64,
    pub error_count: u64,
    pub request_count: u64,

    pub rolling_count_bad_requests: u64,
    pub rolling_count_collapsed_requests: u64,
    pub rolling_count_exceptions_thrown: u64,
    pub rolling_count_failure: u64,
    pub rolling_count_fallback_failure: u64,
    pub rolling_count_fallback_rejection: u64,
    pub rolling_count_fallback_success: u64,
    pub rolling_count_responses_from_cache: u64,
    pub rolling_count_semaphore_rejected: u64,
    pub rolling_count_short_circuited: u64,
    pub rolling_count_success: u64,
    pub rolling_count_thread_pool_rejected: u64,
    pub rolling_count_timeout: u64,
    pub current_concurrent_execution_count: u64,

    #[serde(rename = "latencyExecute_mean")]
    pub latency_execute_mean: f64,
    pub latency_execute: LatencyPercentiles,
    #[serde(rename = "latencyTotal_mean")]
    pub latency_total_mean: f64,
    pub latency_total: LatencyPercentiles,

    #[serde(rename = "propertyValue_circuitBreakerRequestVolumeThreshold")]
    pub property_request_volume_threshold: u64,
    #[serde(rename = "propertyValue_circuitBreakerSleepWindowInMilliseconds")]
    pub property_sleep_window_ms: u64,
    #[serde(rename = "propertyValue_circuitBreakerErrorThresholdPercentage")]
    pub property_error_threshold_percentage: u64,
    #[serde(rename = "propertyValue_circuitBreakerForceOpen")]
    pub property_force_open: bool,
    #[serde(rename = "propertyValue_circuitBreakerForceClosed")]
    pub property_force_closed: bool,
    #[serde(rename = "propertyValue_circuitBreakerEnabled")]
    pub property_enabled: bool,
    #[serde(rename = "propertyValue_executionIsolationStrategy")]
    pub property_isolation_strategy: &'static str,
    #[serde(rename = "propertyValue_executionIsolationThreadTimeoutInMilliseconds")]
    pub property_timeout_ms: u64,
    #[serde(rename = "propertyValue_executionIsolationThreadInterruptOnTimeout")]
    pub property_interrupt_on_timeout: bool,
    #[serde(rename = "propertyValue_executionIsolationSemaphoreMaxConcurrentRequests")]
    pub property_max_concurrent_requests: u64,
    #[serde(rename = "propertyValue_fallbackIsolationSemaphoreMaxConcurrentRequests")]
    pub property_fallback_max_concurrent_requests: u64,
    #[serde(rename = "propertyValue_metricsRollingStatisticalWindowInMilliseconds")]
    pub property_rolling_window_ms: u64,
    #[serde(rename = "propertyValue_requestCacheEnabled")]
    pub property_request_cache_enabled: bool,
    #[serde(rename = "propertyValue_requestLogEnabled")]
    pub property_request_log_enabled: bool,

    pub reporting_hosts: u64,
}

impl HystrixSnapshot {
    /// Builds a snapshot from a breaker's configuration, state and stats.
    pub fn new(config: &CircuitBreakerConfig, state: CircuitState, stats: StatsSnapshot) -> Self {
        let millis = |d: std::time::Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);

        Self {
            kind: "HystrixCommand",
            name: config.name.clone(),
            group: config.group.clone().unwrap_or_default(),
            current_time: chrono::Utc::now().timestamp_millis(),
            is_circuit_breaker_open: state.is_open(),
            error_percentage: stats.error_percentage,
            error_count: stats.error_count,
            request_count: stats.total_requests,

            rolling_count_bad_requests: 0,
            rolling_count_collapsed_requests: 0,
            rolling_count_exceptions_thrown: 0,
            rolling_count_failure: stats.failed_responses,
            rolling_count_fallback_failure: 0,
            rolling_count_fallback_rejection: 0,
            rolling_count_fallback_success: 0,
            rolling_count_responses_from_cache: 0,
            rolling_count_semaphore_rejected: 0,
            rolling_count_short_circuited: stats.rejected_requests,
            rolling_count_success: stats.successful_responses,
            rolling_count_thread_pool_rejected: 0,
            rolling_count_timeout: stats.timeouts,
            current_concurrent_execution_count: stats.concurrent_requests,

            latency_execute_mean: stats.mean_execution_latency,
            latency_execute: stats.latency_execute,
            latency_total_mean: stats.mean_total_latency,
            latency_total: stats.latency_total,

            property_request_volume_threshold: config.max_failures as u64,
            property_sleep_window_ms: millis(config.reset_timeout),
            property_error_threshold_percentage: 0,
            property_force_open: false,
            property_force_closed: false,
            property_enabled: true,
            property_isolation_strategy: if config.bulkhead > 0 {
                "SEMAPHORE"
            } else {
                "THREAD"
            },
            property_timeout_ms: millis(config.timeout),
            property_interrupt_on_timeout: false,
            property_max_concurrent_requests: config.bulkhead as u64,
            property_fallback_max_concurrent_requests: 0,
            property_rolling_window_ms: millis(config.rolling_window),
            property_request_cache_enabled: false,
            property_request_log_enabled: false,

            reporting_hosts: 1,
        }
    }

    /// Serializes the snapshot as a Hystrix stream JSON object.
    #[cfg(feature = "hystrix")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Anything that can report a Hystrix snapshot.
pub trait HystrixProvider: Send + Sync {
    /// Returns the provider's name.
    fn provider_name(&self) -> String;

    /// Returns a point-in-time snapshot.
    fn hystrix_snapshot(&self) -> HystrixSnapshot;
}

/// A sink that observes Hystrix providers.
pub trait HystrixMonitor: Send + Sync {
    /// Called once for every breaker built with this monitor.
    fn register(&self, provider: Weak<dyn HystrixProvider>);
}

/// A [`HystrixMonitor`] that keeps its providers in a list and snapshots
/// them on demand.
///
/// Providers that have been dropped are pruned on the next
/// [`snapshots`](Self::snapshots) call.
#[derive(Default)]
pub struct HystrixCollector {
    providers: Mutex<Vec<Weak<dyn HystrixProvider>>>,
}

impl HystrixCollector {
    /// Creates an empty collector.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of live registered providers.
    pub fn len(&self) -> usize {
        self.providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|p| p.strong_count() > 0)
            .count()
    }

    /// Returns true if no live provider is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots every live provider.
    pub fn snapshots(&self) -> Vec<HystrixSnapshot> {
        let mut providers = self
            .providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        providers.retain(|p| p.strong_count() > 0);
        providers
            .iter()
            .filter_map(Weak::upgrade)
            .map(|p| p.hystrix_snapshot())
            .collect()
    }

    /// Snapshots every live provider as a JSON array.
    #[cfg(feature = "hystrix")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshots())
    }
}

impl HystrixMonitor for HystrixCollector {
    fn register(&self, provider: Weak<dyn HystrixProvider>) {
        let name = provider
            .upgrade()
            .map(|p| p.provider_name())
            .unwrap_or_default();
        tracing::debug!(provider = %name, "Registered Hystrix provider");
        self.providers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(provider);
    }
}

impl std::fmt::Debug for HystrixCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HystrixCollector")
            .field("providers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::LatencyStats;
    use std::time::Duration;

    struct FixedProvider {
        config: CircuitBreakerConfig,
    }

    impl HystrixProvider for FixedProvider {
        fn provider_name(&self) -> String {
            self.config.name.clone()
        }

        fn hystrix_snapshot(&self) -> HystrixSnapshot {
            HystrixSnapshot::new(&self.config, CircuitState::Closed, LatencyStats::new().snapshot())
        }
    }

    #[test]
    fn test_snapshot_field_names() {
        let stats = LatencyStats::new();
        stats.track_request();
        stats.track_request();
        stats.track_failed_response();
        stats.track_rejected();
        stats.track_execution_latency(Duration::from_millis(4));

        let config = CircuitBreakerConfig::new()
            .with_name("payments")
            .with_reset_timeout(Duration::from_secs(30));
        let snapshot = HystrixSnapshot::new(&config, CircuitState::Open, stats.snapshot());
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["type"], "HystrixCommand");
        assert_eq!(json["name"], "payments");
        assert_eq!(json["group"], "");
        assert_eq!(json["isCircuitBreakerOpen"], true);
        assert_eq!(json["errorCount"], 2);
        assert_eq!(json["errorPercentage"], 100.0);
        assert_eq!(json["requestCount"], 2);
        assert_eq!(json["rollingCountShortCircuited"], 1);
        assert_eq!(json["rollingCountFailure"], 1);
        assert_eq!(json["latencyExecute_mean"], 4.0);
        assert_eq!(json["latencyExecute"]["50"], 4.0);
        assert_eq!(json["latencyExecute"]["99.5"], 4.0);
        assert_eq!(
            json["propertyValue_circuitBreakerSleepWindowInMilliseconds"],
            30_000
        );
        assert_eq!(json["reportingHosts"], 1);
        assert!(json["currentTime"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_collector_prunes_dropped_providers() {
        let collector = HystrixCollector::new();
        let provider: Arc<dyn HystrixProvider> = Arc::new(FixedProvider {
            config: CircuitBreakerConfig::new().with_name("a"),
        });
        let transient: Arc<dyn HystrixProvider> = Arc::new(FixedProvider {
            config: CircuitBreakerConfig::new().with_name("b"),
        });

        collector.register(Arc::downgrade(&provider));
        collector.register(Arc::downgrade(&transient));
        assert_eq!(collector.len(), 2);

        drop(transient);
        let snapshots = collector.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "a");
        assert_eq!(collector.len(), 1);
    }

    #[cfg(feature = "hystrix")]
    #[test]
    fn test_collector_json_array() {
        let collector = HystrixCollector::new();
        let provider: Arc<dyn HystrixProvider> = Arc::new(FixedProvider {
            config: CircuitBreakerConfig::new().with_name("a").with_group("g"),
        });
        collector.register(Arc::downgrade(&provider));

        let json: serde_json::Value = serde_json::from_str(&collector.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["group"], "g");
    }
}
