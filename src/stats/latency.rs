//! Request counters and latency samples for a circuit breaker.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Percentile buckets reported for each latency list.
pub const PERCENTILES: [f64; 9] = [0.0, 25.0, 50.0, 75.0, 90.0, 95.0, 99.0, 99.5, 100.0];

/// Default number of samples retained per latency list.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 10_000;

/// Thread-safe counters and latency samples.
///
/// Counters only ever increase until [`reset`](Self::reset) is called.
/// Latency samples are kept in bounded ring buffers; once full, the oldest
/// sample is dropped for every new one.
#[derive(Debug)]
pub struct LatencyStats {
    total_requests: AtomicU64,
    successful_responses: AtomicU64,
    failed_responses: AtomicU64,
    rejected_requests: AtomicU64,
    timeouts: AtomicU64,
    times_opened: AtomicU64,
    times_closed: AtomicU64,
    sample_capacity: usize,
    total_latencies: RwLock<VecDeque<Duration>>,
    execution_latencies: RwLock<VecDeque<Duration>>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    /// Creates empty stats retaining [`DEFAULT_SAMPLE_CAPACITY`] samples.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SAMPLE_CAPACITY)
    }

    /// Creates empty stats retaining at most `capacity` samples per list.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            total_requests: AtomicU64::new(0),
            successful_responses: AtomicU64::new(0),
            failed_responses: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            times_opened: AtomicU64::new(0),
            times_closed: AtomicU64::new(0),
            sample_capacity: capacity,
            total_latencies: RwLock::new(VecDeque::new()),
            execution_latencies: RwLock::new(VecDeque::new()),
        }
    }

    /// Records a request.
    pub fn track_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful response.
    pub fn track_successful_response(&self) {
        self.successful_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed response (timeouts included).
    pub fn track_failed_response(&self) {
        self.failed_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request rejected by an open circuit.
    pub fn track_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a timeout.
    pub fn track_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that the circuit opened.
    pub fn track_opened(&self) {
        self.times_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that the circuit closed.
    pub fn track_closed(&self) {
        self.times_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the latency of dispatching a run.
    pub fn track_total_latency(&self, latency: Duration) {
        Self::push_sample(&self.total_latencies, self.sample_capacity, latency);
    }

    /// Records the latency between command start and resolution.
    pub fn track_execution_latency(&self, latency: Duration) {
        Self::push_sample(&self.execution_latencies, self.sample_capacity, latency);
    }

    fn push_sample(list: &RwLock<VecDeque<Duration>>, capacity: usize, latency: Duration) {
        let mut samples = list
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if samples.len() >= capacity {
            samples.pop_front();
        }
        samples.push_back(latency);
    }

    /// Total number of requests.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Number of successful responses.
    pub fn successful_responses(&self) -> u64 {
        self.successful_responses.load(Ordering::Relaxed)
    }

    /// Number of failed responses.
    pub fn failed_responses(&self) -> u64 {
        self.failed_responses.load(Ordering::Relaxed)
    }

    /// Number of requests rejected while open.
    pub fn rejected_requests(&self) -> u64 {
        self.rejected_requests.load(Ordering::Relaxed)
    }

    /// Number of timeouts.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Number of times the circuit opened.
    pub fn times_opened(&self) -> u64 {
        self.times_opened.load(Ordering::Relaxed)
    }

    /// Number of times the circuit closed after probing.
    pub fn times_closed(&self) -> u64 {
        self.times_closed.load(Ordering::Relaxed)
    }

    /// Requests not yet answered.
    ///
    /// This is an approximation: it is `total - (successful + failed + rejected)`
    /// computed from independently loaded counters.
    pub fn concurrent_requests(&self) -> u64 {
        let answered = self.successful_responses() + self.failed_responses() + self.rejected_requests();
        self.total_requests().saturating_sub(answered)
    }

    /// Failed plus rejected requests.
    pub fn error_count(&self) -> u64 {
        self.failed_responses() + self.rejected_requests()
    }

    /// Error count as a percentage of all requests, capped at 100; 0 when idle.
    pub fn error_percentage(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.error_count().min(total) as f64 * 100.0 / total as f64
    }

    /// Copies of the dispatch latency samples, oldest first.
    pub fn total_latencies(&self) -> Vec<Duration> {
        Self::samples(&self.total_latencies)
    }

    /// Copies of the execution latency samples, oldest first.
    pub fn execution_latencies(&self) -> Vec<Duration> {
        Self::samples(&self.execution_latencies)
    }

    fn samples(list: &RwLock<VecDeque<Duration>>) -> Vec<Duration> {
        list.read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .copied()
            .collect()
    }

    /// Sum of the dispatch latency samples.
    pub fn total_latency(&self) -> Duration {
        self.total_latencies().iter().sum()
    }

    /// Mean dispatch latency; zero with no samples.
    pub fn mean_total_latency(&self) -> Duration {
        mean(&self.total_latencies())
    }

    /// Mean execution latency; zero with no samples.
    pub fn mean_execution_latency(&self) -> Duration {
        mean(&self.execution_latencies())
    }

    /// Percentile buckets of the dispatch latencies.
    pub fn latency_total(&self) -> LatencyPercentiles {
        LatencyPercentiles::compute(self.total_latencies())
    }

    /// Percentile buckets of the execution latencies.
    pub fn latency_execute(&self) -> LatencyPercentiles {
        LatencyPercentiles::compute(self.execution_latencies())
    }

    /// Zeroes every counter and drops all samples.
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successful_responses,
            &self.failed_responses,
            &self.rejected_requests,
            &self.timeouts,
            &self.times_opened,
            &self.times_closed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        for list in [&self.total_latencies, &self.execution_latencies] {
            list.write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clear();
        }
    }

    /// Takes a point-in-time copy of every counter and derived value.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests(),
            successful_responses: self.successful_responses(),
            failed_responses: self.failed_responses(),
            rejected_requests: self.rejected_requests(),
            timeouts: self.timeouts(),
            times_opened: self.times_opened(),
            times_closed: self.times_closed(),
            concurrent_requests: self.concurrent_requests(),
            error_count: self.error_count(),
            error_percentage: self.error_percentage(),
            total_latency: as_millis_f64(self.total_latency()),
            mean_total_latency: as_millis_f64(self.mean_total_latency()),
            mean_execution_latency: as_millis_f64(self.mean_execution_latency()),
            latency_total: self.latency_total(),
            latency_execute: self.latency_execute(),
        }
    }
}

fn mean(samples: &[Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let nanos = samples.iter().map(Duration::as_nanos).sum::<u128>() / samples.len() as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Fractional milliseconds, keeping sub-millisecond resolution.
fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Latency values at each of the [`PERCENTILES`].
///
/// Uses the nearest-rank method. Serializes as a map keyed by the
/// percentile (`"0"`, `"25"`, ..., `"99.5"`, `"100"`) with fractional
/// millisecond values, the shape the Hystrix dashboard reads.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyPercentiles {
    buckets: Vec<(f64, Duration)>,
}

impl LatencyPercentiles {
    /// Computes the buckets for `samples`; every bucket is 0 when empty.
    pub fn compute(mut samples: Vec<Duration>) -> Self {
        samples.sort_unstable();
        let n = samples.len();
        let buckets = PERCENTILES
            .iter()
            .map(|&p| {
                if n == 0 {
                    return (p, Duration::ZERO);
                }
                let rank = ((p / 100.0) * n as f64).ceil() as usize;
                let index = rank.clamp(1, n) - 1;
                (p, samples[index])
            })
            .collect();
        Self { buckets }
    }

    /// Returns the value at percentile `p`, if it is one of the buckets.
    pub fn get(&self, p: f64) -> Option<Duration> {
        self.buckets
            .iter()
            .find(|(bucket, _)| (*bucket - p).abs() < f64::EPSILON)
            .map(|(_, value)| *value)
    }

    /// Iterates over `(percentile, value)` pairs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, Duration)> + '_ {
        self.buckets.iter().copied()
    }
}

impl Serialize for LatencyPercentiles {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.buckets.len()))?;
        for (p, value) in &self.buckets {
            map.serialize_entry(&p.to_string(), &as_millis_f64(*value))?;
        }
        map.end()
    }
}

/// A point-in-time copy of a breaker's statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Total number of requests.
    pub total_requests: u64,
    /// Number of successful responses.
    pub successful_responses: u64,
    /// Number of failed responses.
    pub failed_responses: u64,
    /// Number of requests rejected while open.
    pub rejected_requests: u64,
    /// Number of timeouts.
    pub timeouts: u64,
    /// Number of times the circuit opened.
    pub times_opened: u64,
    /// Number of times the circuit closed after probing.
    pub times_closed: u64,
    /// Approximate in-flight requests.
    pub concurrent_requests: u64,
    /// Failed plus rejected requests.
    pub error_count: u64,
    /// Error count as a percentage of requests.
    pub error_percentage: f64,
    /// Sum of dispatch latencies in milliseconds.
    pub total_latency: f64,
    /// Mean dispatch latency in milliseconds.
    pub mean_total_latency: f64,
    /// Mean execution latency in milliseconds.
    pub mean_execution_latency: f64,
    /// Dispatch latency percentiles.
    pub latency_total: LatencyPercentiles,
    /// Execution latency percentiles.
    pub latency_execute: LatencyPercentiles,
}

impl StatsSnapshot {
    /// Logs every field at debug level.
    pub fn log(&self, breaker: &str) {
        tracing::debug!(
            breaker = %breaker,
            total_requests = self.total_requests,
            concurrent_requests = self.concurrent_requests,
            rejected_requests = self.rejected_requests,
            successful_responses = self.successful_responses,
            failed_responses = self.failed_responses,
            timeouts = self.timeouts,
            mean_execution_latency_ms = self.mean_execution_latency,
            mean_total_latency_ms = self.mean_total_latency,
            total_latency_ms = self.total_latency,
            error_percentage = self.error_percentage,
            "Circuit breaker stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_default_stats() {
        let stats = LatencyStats::new();
        assert_eq!(stats.timeouts(), 0);
        assert_eq!(stats.successful_responses(), 0);
        assert_eq!(stats.failed_responses(), 0);
        assert_eq!(stats.total_requests(), 0);
        assert_eq!(stats.rejected_requests(), 0);
        assert!(stats.total_latencies().is_empty());
        assert!(stats.execution_latencies().is_empty());
    }

    #[test]
    fn test_total_latency() {
        let stats = LatencyStats::new();
        for v in 1..=5 {
            stats.track_total_latency(ms(v));
        }
        assert_eq!(stats.total_latency(), ms(15));
        assert_eq!(stats.snapshot().total_latency, 15.0);
    }

    #[test]
    fn test_percentiles() {
        let stats = LatencyStats::new();
        for v in [5, 3, 1, 4, 2] {
            stats.track_execution_latency(ms(v));
        }

        let buckets = stats.latency_execute();
        let expected = [
            (0.0, ms(1)),
            (25.0, ms(2)),
            (50.0, ms(3)),
            (75.0, ms(4)),
            (90.0, ms(5)),
            (95.0, ms(5)),
            (99.0, ms(5)),
            (99.5, ms(5)),
            (100.0, ms(5)),
        ];
        assert_eq!(buckets.iter().collect::<Vec<_>>(), expected);
        assert_eq!(buckets.get(99.5), Some(ms(5)));
        assert_eq!(buckets.get(42.0), None);
    }

    #[test]
    fn test_percentiles_empty() {
        let buckets = LatencyPercentiles::compute(Vec::new());
        assert!(buckets.iter().all(|(_, v)| v.is_zero()));
    }

    #[test]
    fn test_percentiles_serialize_as_map() {
        let buckets = LatencyPercentiles::compute((1..=5).map(ms).collect());
        let json = serde_json::to_value(&buckets).unwrap();

        assert_eq!(json["0"], 1.0);
        assert_eq!(json["50"], 3.0);
        assert_eq!(json["99.5"], 5.0);
        assert_eq!(json["100"], 5.0);
    }

    #[test]
    fn test_counters() {
        let stats = LatencyStats::new();
        stats.track_timeout();
        stats.track_successful_response();
        stats.track_failed_response();
        stats.track_rejected();
        stats.track_request();

        assert_eq!(stats.timeouts(), 1);
        assert_eq!(stats.successful_responses(), 1);
        assert_eq!(stats.failed_responses(), 1);
        assert_eq!(stats.rejected_requests(), 1);
        assert_eq!(stats.total_requests(), 1);
    }

    #[test]
    fn test_mean_latency() {
        let stats = LatencyStats::new();
        assert_eq!(stats.mean_execution_latency(), Duration::ZERO);
        assert_eq!(stats.mean_total_latency(), Duration::ZERO);

        for v in 1..=5 {
            stats.track_execution_latency(ms(v));
            stats.track_total_latency(ms(v));
        }
        assert_eq!(stats.mean_execution_latency(), ms(3));
        assert_eq!(stats.mean_total_latency(), ms(3));
    }

    #[test]
    fn test_sub_millisecond_samples_keep_resolution() {
        let stats = LatencyStats::new();
        stats.track_total_latency(Duration::from_micros(200));
        stats.track_total_latency(Duration::from_micros(300));

        assert_eq!(stats.mean_total_latency(), Duration::from_micros(250));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.mean_total_latency, 0.25);
        assert_eq!(snapshot.total_latency, 0.5);
        assert_eq!(snapshot.latency_total.get(100.0), Some(Duration::from_micros(300)));
    }

    #[test]
    fn test_error_percentage_is_capped() {
        let stats = LatencyStats::new();
        stats.track_request();
        for _ in 0..3 {
            stats.track_failed_response();
        }

        assert_eq!(stats.error_count(), 3);
        assert_eq!(stats.error_percentage(), 100.0);
    }

    #[test]
    fn test_concurrent_requests() {
        let stats = LatencyStats::new();
        for _ in 0..8 {
            stats.track_request();
        }
        stats.track_successful_response();
        stats.track_failed_response();
        stats.track_failed_response();
        for _ in 0..3 {
            stats.track_rejected();
        }

        assert_eq!(stats.concurrent_requests(), 2);
        assert_eq!(stats.error_count(), 5);
        assert!((stats.error_percentage() - 62.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_percentage_idle() {
        assert_eq!(LatencyStats::new().error_percentage(), 0.0);
    }

    #[test]
    fn test_samples_are_bounded() {
        let stats = LatencyStats::with_capacity(3);
        for v in 1..=5 {
            stats.track_total_latency(ms(v));
        }
        assert_eq!(stats.total_latencies(), vec![ms(3), ms(4), ms(5)]);
    }

    #[test]
    fn test_reset() {
        let stats = LatencyStats::new();
        stats.track_timeout();
        stats.track_request();
        stats.track_rejected();
        stats.track_opened();
        stats.track_total_latency(ms(3));
        stats.track_execution_latency(ms(3));

        stats.reset();

        assert_eq!(stats.snapshot().total_requests, 0);
        assert_eq!(stats.timeouts(), 0);
        assert_eq!(stats.rejected_requests(), 0);
        assert_eq!(stats.times_opened(), 0);
        assert!(stats.total_latencies().is_empty());
        assert!(stats.execution_latencies().is_empty());
    }
}
