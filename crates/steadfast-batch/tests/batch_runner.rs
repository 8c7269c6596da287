//! Integration tests for the batch runner
//!
//! Jobs sleep on a paused tokio clock, so overlap between workers is
//! deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use steadfast_batch::prelude::*;
use tokio::time::{Instant, sleep};

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .base_delay(Duration::from_millis(1))
        .jitter(Jitter::None)
        .build()
}

/// Progress callback that records every `(done, total)` pair.
fn recorder() -> (
    Arc<Mutex<Vec<(usize, usize)>>>,
    impl Fn(usize, usize) + Send + Sync + 'static,
) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    (calls, move |done, total| sink.lock().unwrap().push((done, total)))
}

/// Scratch double that logs its owner's input on release.
struct Tracked {
    input: u32,
    released: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl ScratchResource for Tracked {
    type Error = std::io::Error;

    async fn release(&self) -> Result<(), Self::Error> {
        self.released.lock().unwrap().push(self.input);
        Ok(())
    }
}

fn release_counts(released: &Mutex<Vec<u32>>) -> HashMap<u32, usize> {
    let mut counts = HashMap::new();
    for input in released.lock().unwrap().iter() {
        *counts.entry(*input).or_insert(0) += 1;
    }
    counts
}

#[tokio::test(start_paused = true)]
async fn test_progress_called_once_per_job_and_ends_at_total() {
    let (calls, hook) = recorder();
    let runner = BatchRunner::builder()
        .concurrency(3)
        .policy(fast_policy(1))
        .on_progress(hook)
        .build();

    let report = runner
        .run((0..7u32).collect(), |n| async move {
            sleep(Duration::from_millis(u64::from(7 - n) * 10)).await;
            if n % 3 == 0 {
                Err(OperationError::from_status(500, "boom"))
            } else {
                Ok(n)
            }
        })
        .await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 7);
    assert_eq!(calls.last(), Some(&(7, 7)));
    assert!(calls.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert!(calls.iter().all(|(_, total)| *total == 7));

    assert_eq!(report.total(), 7);
    assert_eq!(report.failure_count(), 3);
    assert_eq!(report.success_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_never_exceeds_concurrency_limit() {
    for concurrency in [1usize, 2, 3, 10] {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let runner = BatchRunner::builder()
            .concurrency(concurrency)
            .policy(fast_policy(0))
            .build();

        let report = runner
            .run((0..8u64).collect(), |n| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(5 + n % 3)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, OperationError>(n)
                }
            })
            .await;

        assert_eq!(report.success_count(), 8);
        assert_eq!(peak.load(Ordering::SeqCst), concurrency.min(8));
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_workers_share_the_load() {
    let runner = BatchRunner::builder()
        .concurrency(4)
        .policy(fast_policy(0))
        .build();

    let start = Instant::now();
    let report = runner
        .run(vec![(); 8], |()| async {
            sleep(Duration::from_millis(100)).await;
            Ok::<_, OperationError>(())
        })
        .await;

    assert!(report.is_complete());
    assert_eq!(start.elapsed(), Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_scratch_released_once_for_every_outcome() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let attempts = Arc::new(AtomicU32::new(0));
    let runner = BatchRunner::builder()
        .concurrency(2)
        .policy(fast_policy(2))
        .build();

    // 1 succeeds, 2 exhausts its retries, 3 fails terminally, 4 succeeds on retry
    let report = runner
        .run_with_scratch(
            vec![1u32, 2, 3, 4],
            |input| Tracked {
                input: *input,
                released: Arc::clone(&released),
            },
            |input, scratch: Arc<Tracked>| {
                let attempts = Arc::clone(&attempts);
                async move {
                    assert_eq!(scratch.input, input);
                    match input {
                        2 => Err(OperationError::from_status(503, "overloaded")),
                        3 => Err(OperationError::Authentication("expired".into())),
                        4 if attempts.fetch_add(1, Ordering::SeqCst) == 0 => {
                            Err(OperationError::Network {
                                code: NetworkCode::ConnectionReset,
                                message: "reset".into(),
                            })
                        }
                        _ => Ok(input * 100),
                    }
                }
            },
        )
        .await;

    let counts = release_counts(&released);
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|count| *count == 1));

    assert_eq!(report.outcome(JobId(0)).and_then(JobOutcome::value), Some(&100));
    assert_eq!(report.outcome(JobId(3)).and_then(JobOutcome::value), Some(&400));
    match report.outcome(JobId(1)) {
        Some(JobOutcome::Failed(err)) => assert_eq!(err.attempts(), 3),
        other => panic!("expected exhausted failure, got {other:?}"),
    }
    match report.outcome(JobId(2)) {
        Some(JobOutcome::Failed(err)) => {
            assert_eq!(err.attempts(), 1);
            assert!(matches!(
                err.operation_error(),
                Some(OperationError::Authentication(_))
            ));
        }
        other => panic!("expected terminal failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_terminal_failure_does_not_stop_the_batch() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let (calls, hook) = recorder();
    let runner = BatchRunner::builder()
        .concurrency(2)
        .policy(fast_policy(3))
        .on_progress(hook)
        .build();

    let report = runner
        .run_with_scratch(
            vec![1u32, 2, 3, 4, 5],
            |input| Tracked {
                input: *input,
                released: Arc::clone(&released),
            },
            |input, _scratch| async move {
                sleep(Duration::from_millis(10)).await;
                if input == 3 {
                    Err(OperationError::BadRequest("job 3 is malformed".into()))
                } else {
                    Ok(input)
                }
            },
        )
        .await;

    assert_eq!(calls.lock().unwrap().last(), Some(&(5, 5)));
    for (id, outcome) in report.iter() {
        if id == JobId(2) {
            assert!(outcome.is_failure());
        } else {
            assert_eq!(outcome.value(), Some(&(id.0 as u32 + 1)));
        }
    }
    let counts = release_counts(&released);
    assert_eq!(counts, (1..=5).map(|n| (n, 1)).collect());
}

#[tokio::test(start_paused = true)]
async fn test_abort_on_first_failure_skips_remaining_jobs() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let (calls, hook) = recorder();
    let runner = BatchRunner::builder()
        .concurrency(1)
        .policy(fast_policy(3))
        .failure_mode(FailureMode::AbortOnFirstFailure)
        .on_progress(hook)
        .build();

    let report = runner
        .run(vec![1u32, 2, 3, 4], |n| {
            started.lock().unwrap().push(n);
            async move {
                if n == 2 {
                    Err(OperationError::PermissionDenied("read-only".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(*started.lock().unwrap(), vec![1, 2]);
    assert!(report.outcome(JobId(0)).is_some_and(JobOutcome::is_success));
    assert!(report.outcome(JobId(1)).is_some_and(JobOutcome::is_failure));
    assert_eq!(report.skipped_count(), 2);
    assert!(!report.is_complete());
    assert_eq!(*calls.lock().unwrap(), vec![(1, 4), (2, 4)]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_new_jobs_and_wakes_in_flight_retries() {
    let token = CancellationToken::new();
    let released = Arc::new(Mutex::new(Vec::new()));
    let runner = BatchRunner::builder()
        .concurrency(2)
        .policy(
            RetryPolicy::builder()
                .max_retries(5)
                .base_delay(Duration::from_secs(30))
                .build(),
        )
        .cancellation(token.clone())
        .build();

    let canceller = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    // 0 and 1 finish at 100ms; 2 and 3 are sleeping between retries at 150ms
    let start = Instant::now();
    let report = runner
        .run_with_scratch(
            (0..6u32).collect(),
            |input| Tracked {
                input: *input,
                released: Arc::clone(&released),
            },
            |n, _scratch| async move {
                if n < 2 {
                    sleep(Duration::from_millis(100)).await;
                    Ok(n)
                } else {
                    Err(OperationError::from_status(502, "bad gateway"))
                }
            },
        )
        .await;

    assert_eq!(start.elapsed(), Duration::from_millis(150));
    assert_eq!(report.success_count(), 2);
    for id in [JobId(2), JobId(3)] {
        match report.outcome(id) {
            Some(JobOutcome::Failed(err)) => assert!(err.is_cancelled()),
            other => panic!("expected cancelled job, got {other:?}"),
        }
    }
    assert_eq!(report.skipped_count(), 2);

    let counts = release_counts(&released);
    assert_eq!(counts, (0..4).map(|n| (n, 1)).collect());
}

#[tokio::test]
async fn test_cancelled_before_start_skips_everything() {
    let token = CancellationToken::new();
    token.cancel();
    let (calls, hook) = recorder();
    let runner = BatchRunner::builder()
        .cancellation(token)
        .on_progress(hook)
        .build();

    let report = runner
        .run(vec![1u32, 2, 3], |n| async move { Ok::<_, OperationError>(n) })
        .await;

    assert_eq!(report.skipped_count(), 3);
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_policy_token_also_stops_the_batch() {
    let token = CancellationToken::new();
    token.cancel();
    let runner = BatchRunner::builder()
        .policy(RetryPolicy::default().with_cancellation(token))
        .build();

    let report = runner
        .run(vec![1u32, 2], |n| async move { Ok::<_, OperationError>(n) })
        .await;

    assert_eq!(report.skipped_count(), 2);
}

#[tokio::test]
async fn test_panicking_job_is_reported_and_cleaned_up() {
    let released = Arc::new(Mutex::new(Vec::new()));
    let runner = BatchRunner::builder()
        .concurrency(2)
        .policy(fast_policy(0))
        .build();

    let report = runner
        .run_with_scratch(
            vec![1u32, 2, 3],
            |input| Tracked {
                input: *input,
                released: Arc::clone(&released),
            },
            |n, _scratch| async move {
                if n == 2 {
                    panic!("renderer crashed on {n}");
                }
                Ok::<_, OperationError>(n)
            },
        )
        .await;

    match report.outcome(JobId(1)) {
        Some(JobOutcome::Panicked(message)) => assert!(message.contains("renderer crashed")),
        other => panic!("expected panic outcome, got {other:?}"),
    }
    assert_eq!(report.success_count(), 2);
    assert_eq!(release_counts(&released).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_retry_independently() {
    let attempts: Arc<Mutex<HashMap<u32, u32>>> = Arc::default();
    let runner = BatchRunner::builder()
        .concurrency(3)
        .policy(fast_policy(4))
        .build();

    let report = runner
        .run(vec![0u32, 1, 2, 3], |n| {
            let attempt = {
                let mut attempts = attempts.lock().unwrap();
                let entry = attempts.entry(n).or_insert(0);
                *entry += 1;
                *entry
            };
            async move {
                // job n fails n times before succeeding
                if attempt <= n {
                    Err(OperationError::RequestTimeout("slow".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

    let values: Vec<u32> = report.succeeded().map(|(_, v)| *v).collect();
    assert_eq!(values, vec![1, 2, 3, 4]);
}
