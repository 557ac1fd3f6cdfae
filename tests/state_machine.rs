//! State machine tests: tripping, fast-failing, probing and forced transitions.

use circuitbridge::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;

use common::{fast_config, wait_until, Recorder};

fn failing_breaker(config: CircuitBreakerConfig, recorder: &Recorder) -> CircuitBreaker<(), ()> {
    CircuitBreaker::builder()
        .with_config(config)
        .direct(|_: ()| Err("dependency down".into()))
        .fallback(recorder.fallback())
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failures_within_window_trip_circuit() {
    let recorder = Recorder::new();
    let breaker = failing_breaker(fast_config(3), &recorder);

    for expected in 1..=3 {
        breaker.run((), ());
        assert!(wait_until(Duration::from_secs(1), || recorder.len() == expected).await);
    }

    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(breaker.number_of_failures(), 3);
    assert_eq!(breaker.stats().failed_responses(), 3);
    assert!(breaker.is_reset_timer_armed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spaced_failures_stay_closed() {
    let recorder = Recorder::new();
    let config = fast_config(3).with_rolling_window(Duration::from_millis(100));
    let breaker = failing_breaker(config, &recorder);

    for _ in 0..4 {
        breaker.run((), ());
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    assert_eq!(recorder.len(), 4);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.number_of_failures(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_circuit_fails_fast_without_invoking() {
    let recorder = Recorder::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let breaker = CircuitBreaker::builder()
        .with_config(fast_config(2).with_reset_timeout(Duration::from_secs(10)))
        .direct(move |_: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .fallback(recorder.fallback())
        .build()
        .unwrap();

    breaker.force_open();
    for _ in 0..5 {
        breaker.run((), ());
    }

    assert_eq!(recorder.len(), 5);
    assert!(recorder.outcomes().iter().all(BreakerError::is_fast_fail));
    assert_eq!(breaker.stats().rejected_requests(), 5);
    assert_eq!(breaker.stats().total_requests(), 5);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let BreakerError::FastFail { remaining } = &recorder.outcomes()[0] else {
        panic!("expected fast fail");
    };
    assert!(remaining.is_some_and(|r| r <= Duration::from_secs(10)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_timer_half_opens_then_success_closes() {
    let recorder = Recorder::new();
    let healthy = Arc::new(AtomicBool::new(false));
    let dependency = Arc::clone(&healthy);
    let breaker = CircuitBreaker::builder()
        .with_config(fast_config(2))
        .direct(move |_: ()| {
            if dependency.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("down".into())
            }
        })
        .fallback(recorder.fallback())
        .build()
        .unwrap();

    breaker.run((), ());
    breaker.run((), ());
    assert!(wait_until(Duration::from_secs(1), || breaker.state() == CircuitState::Open).await);

    healthy.store(true, Ordering::SeqCst);
    assert!(
        wait_until(Duration::from_secs(1), || breaker.state() == CircuitState::HalfOpen).await
    );
    assert!(!breaker.is_reset_timer_armed());

    breaker.run((), ());
    assert!(wait_until(Duration::from_secs(1), || breaker.state() == CircuitState::Closed).await);
    assert_eq!(breaker.number_of_failures(), 0);
    assert_eq!(breaker.stats().times_opened(), 1);
    assert_eq!(breaker.stats().times_closed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_half_open_failure_reopens_and_rearms() {
    let recorder = Recorder::new();
    let breaker = failing_breaker(fast_config(5), &recorder);

    breaker.force_half_open();
    breaker.run((), ());
    assert!(wait_until(Duration::from_secs(1), || recorder.len() == 1).await);

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.is_reset_timer_armed());
    let outcome = &recorder.outcomes()[0];
    assert!(matches!(outcome, BreakerError::HalfOpenProbeFailure { .. }));
    assert_eq!(outcome.root_cause(), &BreakerError::invocation("dependency down"));
}

#[tokio::test]
async fn test_forced_transitions() {
    let recorder = Recorder::new();
    let breaker = failing_breaker(fast_config(2), &recorder);

    breaker.notify_failure(BreakerError::invocation("external"), ());
    assert_eq!(breaker.number_of_failures(), 1);

    breaker.force_open();
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.is_reset_timer_armed());

    breaker.force_half_open();
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(!breaker.is_reset_timer_armed());

    breaker.force_closed();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.number_of_failures(), 0);
}

#[tokio::test]
async fn test_force_open_rearms_single_timer() {
    let recorder = Recorder::new();
    let breaker = failing_breaker(
        fast_config(2).with_reset_timeout(Duration::from_millis(80)),
        &recorder,
    );

    breaker.force_open();
    tokio::time::sleep(Duration::from_millis(50)).await;
    breaker.force_open();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The first timer would have fired by now; only the second is live.
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(
        wait_until(Duration::from_secs(1), || breaker.state() == CircuitState::HalfOpen).await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stats_snapshot_and_reset() {
    let recorder = Recorder::new();
    let breaker = failing_breaker(fast_config(10), &recorder);

    breaker.run((), ());
    breaker.run((), ());
    assert!(wait_until(Duration::from_secs(1), || recorder.len() == 2).await);

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.total_requests, 2);
    assert_eq!(snapshot.failed_responses, 2);
    assert_eq!(snapshot.error_count, 2);
    assert_eq!(snapshot.error_percentage, 100.0);
    breaker.log_snapshot();

    breaker.reset_stats();
    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.total_requests, 0);
    assert_eq!(snapshot.error_percentage, 0.0);
    assert_eq!(breaker.number_of_failures(), 2);
}
