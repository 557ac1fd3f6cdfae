//! Basic circuit breaker example.
//!
//! This example shows how to:
//! - Wrap a flaky command with a circuit breaker
//! - Watch the circuit trip, fail fast and recover
//! - Read the breaker statistics
//!
//! Run with: cargo run --example basic_breaker

use circuitbridge::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Circuitbridge Basic Example ===\n");

    let healthy = Arc::new(AtomicBool::new(false));
    let dependency = Arc::clone(&healthy);

    let config = CircuitBreakerConfig::new()
        .with_name("inventory")
        .with_timeout(Duration::from_millis(200))
        .with_max_failures(3)
        .with_rolling_window(Duration::from_secs(2))
        .with_reset_timeout(Duration::from_millis(500));

    println!("Circuit Breaker Configuration:");
    println!("  Max failures: {}", config.max_failures);
    println!("  Rolling window: {:?}", config.rolling_window);
    println!("  Reset timeout: {:?}", config.reset_timeout);
    println!();

    let breaker = CircuitBreaker::builder()
        .with_config(config)
        .direct(move |sku: &'static str| {
            if dependency.load(Ordering::SeqCst) {
                println!("  lookup {sku}: ok");
                Ok(())
            } else {
                Err(format!("inventory service unavailable for {sku}").into())
            }
        })
        .fallback(|error: BreakerError, sku: &'static str| {
            println!("  lookup {sku}: fallback ({})", error.kind());
        })
        .build()?;

    println!("Sending requests while the dependency is down...\n");
    for sku in ["A-100", "A-101", "A-102", "A-103", "A-104"] {
        breaker.run(sku, sku);
        tokio::time::sleep(Duration::from_millis(50)).await;
        println!("  state = {}", breaker.state());
    }

    println!("\nDependency recovers; waiting for the reset timeout...\n");
    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(600)).await;
    println!("  state = {}", breaker.state());

    breaker.run("A-105", "A-105");
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("  state = {}", breaker.state());

    let stats = breaker.snapshot();
    println!("\n=== Statistics ===");
    println!("  Total requests: {}", stats.total_requests);
    println!("  Successful: {}", stats.successful_responses);
    println!("  Failed: {}", stats.failed_responses);
    println!("  Rejected: {}", stats.rejected_requests);
    println!("  Times opened: {}", stats.times_opened);
    println!("  Error percentage: {:.1}%", stats.error_percentage);

    breaker.log_snapshot();

    Ok(())
}
