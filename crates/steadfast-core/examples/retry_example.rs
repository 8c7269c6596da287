//! Example: retrying a flaky remote call
//!
//! This example demonstrates:
//! 1. Exponential backoff without jitter (predictable timing)
//! 2. A terminal error that is never retried
//! 3. Jitter modes side by side (run multiple times to see variance)
//! 4. Per-attempt timeouts
//!
//! Run with:
//! ```bash
//! RUST_LOG=debug cargo run -p steadfast-core --example retry_example
//! ```

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use steadfast_core::prelude::*;
use tracing_subscriber::EnvFilter;

/// A simulated remote record store that fails the first few times.
struct UnreliableStore {
    attempts: Arc<AtomicU32>,
    fail_count: u32,
}

impl UnreliableStore {
    fn new(fail_count: u32) -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
            fail_count,
        }
    }

    fn fetch(&self) -> impl Future<Output = Result<String, OperationError>> + Send + use<> {
        let attempts = Arc::clone(&self.attempts);
        let fail_count = self.fail_count;
        async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < fail_count {
                println!("  Attempt {}: FAILED (503)", attempt + 1);
                Err(OperationError::from_status(503, "service unavailable"))
            } else {
                println!("  Attempt {}: SUCCESS", attempt + 1);
                Ok("record #42".to_string())
            }
        }
    }

    fn total_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

async fn example_simple_retry() -> Result<(), Box<dyn Error>> {
    println!("\n=== Example 1: Exponential Backoff ===\n");

    let policy = RetryPolicy::builder()
        .max_retries(3)
        .base_delay(Duration::from_millis(100))
        .factor(2.0)
        .jitter(Jitter::None)
        .build();
    let store = UnreliableStore::new(2);

    let start = Instant::now();
    let record = policy.execute(|| store.fetch()).await?;

    println!("\nResult: {record}");
    println!("Total attempts: {}", store.total_attempts());
    println!("Total time: {:?} (expected ~300ms)", start.elapsed());
    Ok(())
}

async fn example_terminal_error() -> Result<(), Box<dyn Error>> {
    println!("\n=== Example 2: Terminal Error ===\n");

    let policy = RetryPolicy::builder().max_retries(5).build();
    let attempts = AtomicU32::new(0);

    let result = policy
        .execute(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(OperationError::from_status(401, "token expired")) }
        })
        .await;

    match result {
        Err(err) => println!("Gave up after {} attempt(s): {err}", err.attempts()),
        Ok(()) => println!("Unexpected success"),
    }
    println!("Operation invoked {} time(s)", attempts.load(Ordering::SeqCst));
    Ok(())
}

fn example_jitter_modes() {
    println!("\n=== Example 3: Jitter Modes ===\n");

    for jitter in [Jitter::None, Jitter::Full, Jitter::Equal, Jitter::Decorrelated] {
        let backoff = ExponentialBackoff::builder()
            .base_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(5))
            .jitter(jitter)
            .build();

        let mut previous = None;
        let delays: Vec<String> = (0..6)
            .map(|attempt| {
                let delay = backoff.delay(attempt, previous);
                previous = Some(delay);
                format!("{}ms", delay.as_millis())
            })
            .collect();
        println!("  {:<14} {}", format!("{jitter:?}"), delays.join(", "));
    }
}

async fn example_timeout() -> Result<(), Box<dyn Error>> {
    println!("\n=== Example 4: Per-Attempt Timeout ===\n");

    let policy = RetryPolicy::builder()
        .max_retries(2)
        .base_delay(Duration::from_millis(50))
        .attempt_timeout(Duration::from_millis(200))
        .on_retry(|event| {
            println!(
                "  attempt {} failed ({}); next try at {}",
                event.attempt, event.error, event.scheduled_at
            )
        })
        .build();

    let result = policy
        .execute(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, OperationError>(())
        })
        .await;

    if let Err(err) = result {
        println!("Final error: {err}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    example_simple_retry().await?;
    example_terminal_error().await?;
    example_jitter_modes();
    example_timeout().await?;
    Ok(())
}
