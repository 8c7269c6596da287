//! Bounded-concurrency batch runner.
//!
//! ## Architecture
//!
//! ```text
//! inputs → [VecDeque queue] → N worker loops → RetryPolicy::execute(job) → release scratch
//!                 ▲                 │                                             │
//!                 └── pop (locked) ─┘               done += 1, on_progress ◀──────┘ (locked)
//! ```
//!
//! Workers run as futures joined on the caller's task, so inputs and the job
//! closure do not need to be `'static`. Queue pops and the completion
//! counter share a single lock, which is never held across an await.

use futures::FutureExt;
use futures::future::{join_all, select_all};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::Instrument;

use steadfast_core::CancellationToken;
use steadfast_core::error::ConfigError;
use steadfast_core::retry::RetryPolicy;

use crate::config::BatchConfig;
use crate::report::{BatchReport, JobId, JobOutcome};
use crate::scratch::ScratchResource;

/// Progress callback: `(done, total)`.
pub type ProgressHook = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// What the batch does when a job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Record the failure and keep going.
    #[default]
    Continue,
    /// Cancel the batch on the first failed job. Queued jobs are skipped and
    /// in-flight retries abort.
    #[serde(rename = "abort", alias = "abort_on_first_failure")]
    AbortOnFirstFailure,
}

impl std::str::FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(FailureMode::Continue),
            "abort" | "abort_on_first_failure" => Ok(FailureMode::AbortOnFirstFailure),
            other => Err(format!("unknown failure mode '{other}'")),
        }
    }
}

/// Runs independent jobs with at most `concurrency` in flight.
///
/// # Examples
///
/// ```rust
/// use steadfast_batch::BatchRunner;
/// use steadfast_core::retry::RetryPolicy;
///
/// # #[tokio::main]
/// # async fn main() {
/// let runner = BatchRunner::builder()
///     .concurrency(4)
///     .policy(RetryPolicy::no_retry())
///     .on_progress(|done, total| println!("{done}/{total}"))
///     .build();
///
/// let report = runner
///     .run(vec![1u32, 2, 3], |n| async move { Ok::<_, std::io::Error>(n * 10) })
///     .await;
///
/// assert_eq!(report.success_count(), 3);
/// # }
/// ```
#[derive(Clone)]
pub struct BatchRunner {
    concurrency: usize,
    policy: RetryPolicy,
    failure_mode: FailureMode,
    cancellation: Option<CancellationToken>,
    on_progress: Option<ProgressHook>,
}

/// State shared by the worker loops of one run.
struct BatchState<I, T, E> {
    queue: VecDeque<(JobId, I)>,
    done: usize,
    outcomes: Vec<Option<JobOutcome<T, E>>>,
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BatchRunner {
    /// Create a new builder for configuring a batch runner.
    pub fn builder() -> BatchRunnerBuilder {
        BatchRunnerBuilder::default()
    }

    /// Build a runner from plain configuration.
    pub fn from_config(config: &BatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::builder()
            .concurrency(config.concurrency)
            .failure_mode(config.failure_mode)
            .policy(config.retry.to_policy()?)
            .build())
    }

    /// Maximum number of jobs in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Retry policy applied to every job.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Failure handling mode.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Run `job` once per input, retrying each through the runner's policy.
    ///
    /// Individual job failures never abort the batch unless the runner is in
    /// [`FailureMode::AbortOnFirstFailure`]. The returned report lists every
    /// job's outcome in input order.
    pub async fn run<I, F, Fut, T, E>(&self, inputs: Vec<I>, job: F) -> BatchReport<T, E>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        self.run_with_scratch(inputs, |_| (), |input, _scratch: Arc<()>| job(input))
            .await
    }

    /// Like [`run`](Self::run), with a scratch resource per job.
    ///
    /// `allocate` is called once per job before its first attempt. Every
    /// attempt receives the same `Arc<S>`. The resource is released exactly
    /// once after the job settles: on success, on exhausted or terminal
    /// failure, on cancellation, and when the job panics.
    pub async fn run_with_scratch<I, S, A, F, Fut, T, E>(
        &self,
        inputs: Vec<I>,
        allocate: A,
        job: F,
    ) -> BatchReport<T, E>
    where
        I: Clone,
        S: ScratchResource,
        A: Fn(&I) -> S,
        F: Fn(I, Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let total = inputs.len();
        if total == 0 {
            return BatchReport::new(Vec::new());
        }

        let workers = self.concurrency.min(total);
        let run_token = CancellationToken::new();
        let policy = self.policy.clone().with_cancellation(run_token.clone());
        let state = Mutex::new(BatchState {
            queue: inputs
                .into_iter()
                .enumerate()
                .map(|(idx, input)| (JobId(idx), input))
                .collect(),
            done: 0,
            outcomes: std::iter::repeat_with(|| None).take(total).collect(),
        });

        // The run token replaces any token on the caller's policy, so both
        // the runner's and the policy's tokens feed into it.
        let external: Vec<CancellationToken> = self
            .cancellation
            .iter()
            .chain(self.policy.cancellation())
            .cloned()
            .collect();
        if external.iter().any(CancellationToken::is_cancelled) {
            run_token.cancel();
        }

        tracing::info!(total, workers, failure_mode = ?self.failure_mode, "starting batch");

        {
            let worker_loops = join_all((0..workers).map(|worker| {
                self.worker_loop(worker, total, &state, &policy, &run_token, &allocate, &job)
            }));
            let linked_cancel = async {
                if external.is_empty() {
                    std::future::pending::<()>().await;
                }
                select_all(external.iter().map(|token| Box::pin(token.cancelled()))).await;
                tracing::info!("batch cancelled by caller");
                run_token.cancel();
            };

            tokio::pin!(worker_loops);
            tokio::select! {
                _ = &mut worker_loops => {}
                _ = linked_cancel => {
                    worker_loops.await;
                }
            }
        }

        let state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let report = BatchReport::new(
            state
                .outcomes
                .into_iter()
                .map(|outcome| outcome.unwrap_or(JobOutcome::Skipped))
                .collect(),
        );

        tracing::info!(
            total,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            skipped = report.skipped_count(),
            "batch finished"
        );
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn worker_loop<I, S, A, F, Fut, T, E>(
        &self,
        worker: usize,
        total: usize,
        state: &Mutex<BatchState<I, T, E>>,
        policy: &RetryPolicy,
        run_token: &CancellationToken,
        allocate: &A,
        job: &F,
    ) where
        I: Clone,
        S: ScratchResource,
        A: Fn(&I) -> S,
        F: Fn(I, Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        loop {
            if run_token.is_cancelled() {
                break;
            }
            let Some((id, input)) = lock(state).queue.pop_front() else {
                break;
            };

            let span = tracing::debug_span!("batch_job", job = %id, worker);
            let outcome = self
                .run_job(input, policy, allocate, job)
                .instrument(span)
                .await;

            let failed = outcome.is_failure();
            if failed {
                tracing::warn!(job = %id, "job failed");
            }

            {
                let mut state = lock(state);
                state.done += 1;
                state.outcomes[id.0] = Some(outcome);
                if let Some(hook) = &self.on_progress {
                    hook(state.done, total);
                }
            }

            if failed
                && self.failure_mode == FailureMode::AbortOnFirstFailure
                && !run_token.is_cancelled()
            {
                tracing::warn!(job = %id, "aborting batch after first failure");
                run_token.cancel();
            }
        }
    }

    async fn run_job<I, S, A, F, Fut, T, E>(
        &self,
        input: I,
        policy: &RetryPolicy,
        allocate: &A,
        job: &F,
    ) -> JobOutcome<T, E>
    where
        I: Clone,
        S: ScratchResource,
        A: Fn(&I) -> S,
        F: Fn(I, Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let scratch = Arc::new(allocate(&input));

        let result = AssertUnwindSafe(policy.execute(|| job(input.clone(), Arc::clone(&scratch))))
            .catch_unwind()
            .await;

        if let Err(err) = scratch.release().await {
            tracing::warn!(error = %err, "failed to release scratch resource");
        }

        match result {
            Ok(Ok(value)) => JobOutcome::Succeeded(value),
            Ok(Err(err)) => {
                tracing::debug!(attempts = err.attempts(), error = %err, "job gave up");
                JobOutcome::Failed(err)
            }
            Err(panic) => JobOutcome::Panicked(panic_message(panic.as_ref())),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "job panicked".to_string()
    }
}

impl fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRunner")
            .field("concurrency", &self.concurrency)
            .field("policy", &self.policy)
            .field("failure_mode", &self.failure_mode)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("has_on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`BatchRunner`].
#[derive(Default)]
pub struct BatchRunnerBuilder {
    concurrency: Option<usize>,
    policy: Option<RetryPolicy>,
    failure_mode: Option<FailureMode>,
    cancellation: Option<CancellationToken>,
    on_progress: Option<ProgressHook>,
}

impl BatchRunnerBuilder {
    /// Maximum number of jobs in flight. Values below 1 are raised to 1.
    ///
    /// Default: 4
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency.max(1));
        self
    }

    /// Retry policy applied to every job.
    ///
    /// Default: [`RetryPolicy::default`]
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// What to do when a job fails.
    ///
    /// Default: [`FailureMode::Continue`]
    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = Some(mode);
        self
    }

    /// Stop starting new jobs and abort in-flight retries once `token` is cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Called after every completed job with `(done, total)`.
    ///
    /// `done` is strictly increasing across calls within a run.
    pub fn on_progress<P>(mut self, hook: P) -> Self
    where
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(hook));
        self
    }

    /// Build the `BatchRunner` instance.
    pub fn build(self) -> BatchRunner {
        BatchRunner {
            concurrency: self.concurrency.unwrap_or(4),
            policy: self.policy.unwrap_or_default(),
            failure_mode: self.failure_mode.unwrap_or_default(),
            cancellation: self.cancellation,
            on_progress: self.on_progress,
        }
    }
}
