//! Example: producing one artifact per business record
//!
//! A flaky data provider is read through a retry policy, then a batch of
//! artifacts is rendered with bounded concurrency. Each artifact borrows an
//! off-screen render target that is released whatever happens to the job.
//!
//! Run with:
//! ```bash
//! RUST_LOG=steadfast_batch=debug,steadfast_core=debug cargo run -p steadfast-batch --example artifact_batch
//! ```

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use steadfast_batch::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct BusinessRecord {
    id: u32,
    name: String,
}

/// Remote record source that drops the first request.
struct BusinessDataProvider {
    requests: AtomicU32,
}

impl BusinessDataProvider {
    async fn fetch_all(&self) -> Result<Vec<BusinessRecord>, OperationError> {
        if self.requests.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(OperationError::Network {
                code: NetworkCode::ConnectionReset,
                message: "peer hung up".into(),
            });
        }
        Ok((1..=6)
            .map(|id| BusinessRecord {
                id,
                name: format!("entity-{id}"),
            })
            .collect())
    }
}

/// Stand-in for an off-screen canvas.
struct RenderTarget {
    record: u32,
    live: Arc<AtomicUsize>,
}

impl RenderTarget {
    fn allocate(record: &BusinessRecord, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            record: record.id,
            live: Arc::clone(live),
        }
    }
}

#[async_trait]
impl ScratchResource for RenderTarget {
    type Error = std::io::Error;

    async fn release(&self) -> Result<(), Self::Error> {
        self.live.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(record = self.record, "render target released");
        Ok(())
    }
}

#[derive(Debug)]
struct Artifact {
    file_name: String,
    bytes: usize,
}

async fn produce_artifact(
    record: BusinessRecord,
    target: Arc<RenderTarget>,
) -> Result<Artifact, OperationError> {
    tokio::time::sleep(Duration::from_millis(40 + u64::from(record.id) * 10)).await;
    match record.id {
        // permanently broken input
        4 => Err(OperationError::BadRequest(format!(
            "{} has no layout",
            record.name
        ))),
        _ => Ok(Artifact {
            file_name: format!("{}.pdf", record.name),
            bytes: 1024 * target.record as usize,
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let fetch_policy = RetryPolicy::builder()
        .max_retries(3)
        .base_delay(Duration::from_millis(100))
        .jitter(Jitter::Full)
        .on_retry(|event| println!("fetch attempt {} failed: {}", event.attempt, event.error))
        .build();
    let provider = Arc::new(BusinessDataProvider {
        requests: AtomicU32::new(0),
    });
    let records = fetch_policy
        .execute(|| {
            let provider = Arc::clone(&provider);
            async move { provider.fetch_all().await }
        })
        .await?;
    println!("Fetched {} records\n", records.len());

    let config = BatchConfig::from_env()?;
    let runner = BatchRunner::builder()
        .concurrency(config.concurrency.min(3))
        .failure_mode(config.failure_mode)
        .policy(config.retry.to_policy()?)
        .on_progress(|done, total| println!("  progress: {done}/{total}"))
        .build();

    let live = Arc::new(AtomicUsize::new(0));
    let report = runner
        .run_with_scratch(
            records,
            |record| RenderTarget::allocate(record, &live),
            produce_artifact,
        )
        .await;

    println!();
    for (id, outcome) in report.iter() {
        match outcome {
            JobOutcome::Succeeded(artifact) => {
                println!("{id}: wrote {} ({} bytes)", artifact.file_name, artifact.bytes)
            }
            JobOutcome::Failed(err) => {
                println!("{id}: failed after {} attempt(s): {err}", err.attempts())
            }
            JobOutcome::Panicked(message) => println!("{id}: panicked: {message}"),
            JobOutcome::Skipped => println!("{id}: skipped"),
        }
    }
    println!(
        "\n{} succeeded, {} failed, {} render targets still allocated",
        report.success_count(),
        report.failure_count(),
        live.load(Ordering::SeqCst)
    );
    Ok(())
}
