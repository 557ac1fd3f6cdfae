//! Context command example.
//!
//! This example shows how to:
//! - Report outcomes from a callback through an `Invocation`
//! - Let the breaker's timeout resolve commands that never report
//! - Force the circuit into a given state
//!
//! Run with: cargo run --example context_command

use circuitbridge::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Request {
    id: u32,
    delay_ms: u64,
    succeed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("circuitbridge=debug")
        .init();

    println!("=== Context Command Example ===\n");

    let breaker = CircuitBreaker::builder()
        .with_config(
            CircuitBreakerConfig::new()
                .with_name("callbacks")
                .with_timeout(Duration::from_millis(100))
                .with_max_failures(2)
                .with_reset_timeout(Duration::from_millis(300)),
        )
        .context(|invocation: Invocation<Request, u32>| {
            let request = *invocation.args();
            // Complete from another task, as a callback-based client would.
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(request.delay_ms)).await;
                if request.succeed {
                    invocation.notify_success();
                } else {
                    invocation.notify_failure(format!("request {} rejected", request.id));
                }
                if invocation.is_timed_out() {
                    println!("  request {} answered after its deadline", request.id);
                }
            });
        })
        .fallback(|error: BreakerError, id: u32| {
            println!("  request {id}: fallback -> {error}");
        })
        .build()?;

    let requests = [
        Request { id: 1, delay_ms: 10, succeed: true },
        Request { id: 2, delay_ms: 250, succeed: true },
        Request { id: 3, delay_ms: 10, succeed: false },
        Request { id: 4, delay_ms: 10, succeed: true },
    ];

    for request in requests {
        println!("Running request {}", request.id);
        breaker.run(request, request.id);
        tokio::time::sleep(Duration::from_millis(300)).await;
        println!("  state = {}, failures = {}", breaker.state(), breaker.number_of_failures());
    }

    println!("\nForcing the circuit open...");
    breaker.force_open();
    breaker.run(Request { id: 5, delay_ms: 10, succeed: true }, 5);

    println!("Forcing the circuit closed...");
    breaker.force_closed();
    breaker.run(Request { id: 6, delay_ms: 10, succeed: true }, 6);
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\nFinal state: {}", breaker.state());
    println!("Timeouts: {}", breaker.stats().timeouts());

    Ok(())
}
