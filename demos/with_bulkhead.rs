//! Bulkhead and Hystrix monitoring example.
//!
//! This example shows how to:
//! - Cap concurrent executions with a bulkhead
//! - Guard a command that cannot report failure
//! - Register breakers with a Hystrix collector
//! - Render Hystrix snapshots as JSON
//!
//! Run with: cargo run --example with_bulkhead

use circuitbridge::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Bulkhead Example ===\n");

    let collector = HystrixCollector::new();

    let breaker = CircuitBreaker::builder()
        .with_config(
            CircuitBreakerConfig::new()
                .with_name("thumbnails")
                .with_group("media")
                .with_timeout(Duration::from_secs(1))
                .with_bulkhead(2),
        )
        .future(|image: u32| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            println!("  rendered thumbnail {image}");
            Ok(())
        })
        .fallback(|error: BreakerError, image: u32| {
            println!("  thumbnail {image} skipped: {error}");
        })
        .with_monitor(collector.clone())
        .build()?;

    // Only timeouts and panics count against an infallible command.
    let audit = CircuitBreaker::builder()
        .with_config(
            CircuitBreakerConfig::new()
                .with_name("audit-log")
                .with_group("media")
                .with_timeout(Duration::from_millis(50)),
        )
        .command(Command::infallible(|image: u32| {
            let pause = if image == 5 { 200 } else { 1 };
            std::thread::sleep(Duration::from_millis(pause));
            println!("  audited thumbnail {image}");
        }))
        .fallback(|error: BreakerError, image: u32| {
            println!("  audit of thumbnail {image} failed: {error}");
        })
        .with_monitor(collector.clone())
        .build()?;

    println!("Submitting 6 renders with a bulkhead of 2...\n");
    for image in 0..6 {
        breaker.run(image, image);
        audit.run(image, image);
    }

    if let Some(bulkhead) = breaker.bulkhead() {
        tokio::time::sleep(Duration::from_millis(20)).await;
        println!(
            "  active = {}, queued = {}",
            bulkhead.active_count(),
            bulkhead.queued_count()
        );
    }

    tokio::time::sleep(Duration::from_millis(400)).await;

    println!("\n=== Hystrix Snapshot ===");
    let snapshots: serde_json::Value = serde_json::from_str(&collector.to_json()?)?;
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    println!("\nLive providers: {}", collector.len());
    drop(breaker);
    drop(audit);
    println!("Live providers after drop: {}", collector.len());

    Ok(())
}
