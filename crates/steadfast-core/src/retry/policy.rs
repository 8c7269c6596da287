//! Retry policy: how many attempts, how long to wait, what to retry.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::error::Error;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use super::exponential::{ExponentialBackoff, Jitter};
use crate::cancel::CancellationToken;
use crate::classify::{default_is_retryable, retry_after_hint};

/// Decides whether a failed attempt should be retried.
///
/// Receives the failure and the 0-based index of the attempt that produced it.
pub type Classifier = Arc<dyn Fn(&(dyn Error + 'static), u32) -> bool + Send + Sync>;

/// Observability hook invoked before every retry sleep.
pub type RetryHook = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

/// What the `on_retry` hook gets to see.
#[derive(Debug)]
pub struct RetryEvent<'a> {
    /// 0-based index of the attempt that just failed
    pub attempt: u32,
    /// The failure that triggered the retry
    pub error: &'a (dyn Error + 'static),
    /// How long the executor will sleep
    pub delay: Duration,
    /// Wall-clock time at which the next attempt is scheduled
    pub scheduled_at: DateTime<Utc>,
}

/// Per-attempt bookkeeping, created fresh for every attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext {
    /// 0-based attempt index
    pub attempt: u32,
    /// When the attempt started
    pub started_at: Instant,
    /// Delay slept before this attempt, `None` for the first one
    pub previous_delay: Option<Duration>,
}

impl AttemptContext {
    /// Start bookkeeping for attempt `attempt` at the current instant.
    pub fn new(attempt: u32, previous_delay: Option<Duration>) -> Self {
        Self {
            attempt,
            started_at: Instant::now(),
            previous_delay,
        }
    }
}

/// Immutable retry configuration shared by every call it drives.
///
/// Cloning is cheap: hooks, the classifier and the optional seeded RNG are
/// reference counted.
///
/// # Examples
///
/// ```rust
/// use steadfast_core::retry::{Jitter, RetryPolicy};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = RetryPolicy::builder()
///     .max_retries(3)
///     .base_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(5))
///     .jitter(Jitter::Equal)
///     .attempt_timeout(Duration::from_secs(2))
///     .build();
///
/// let value = policy.execute(|| async { Ok::<_, std::io::Error>(42) }).await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: ExponentialBackoff,
    attempt_timeout: Option<Duration>,
    classifier: Classifier,
    on_retry: Option<RetryHook>,
    cancellation: Option<CancellationToken>,
    rng: Option<Arc<Mutex<StdRng>>>,
    respect_retry_after: bool,
}

impl RetryPolicy {
    /// Create a new builder for configuring a retry policy.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The backoff calculator.
    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    /// Per-attempt timeout, if any.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// Cancellation token observed by the retry loop, if any.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Return a copy of this policy that observes `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Ask the classifier whether `error` from attempt `attempt` may be retried.
    pub fn should_retry(&self, error: &(dyn Error + 'static), attempt: u32) -> bool {
        (self.classifier)(error, attempt)
    }

    /// Delay to sleep after the attempt described by `ctx` failed with `error`.
    pub fn next_delay(&self, ctx: &AttemptContext, error: &(dyn Error + 'static)) -> Duration {
        if self.respect_retry_after {
            if let Some(hint) = retry_after_hint(error) {
                return hint.min(self.backoff.max_delay());
            }
        }

        match &self.rng {
            Some(rng) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                self.backoff
                    .delay_with_rng(ctx.attempt, ctx.previous_delay, &mut *rng)
            }
            None => self.backoff.delay(ctx.attempt, ctx.previous_delay),
        }
    }

    /// Invoke the `on_retry` hook. A panicking hook is logged and otherwise ignored.
    pub(crate) fn notify_retry(&self, attempt: u32, error: &(dyn Error + 'static), delay: Duration) {
        let Some(hook) = &self.on_retry else {
            return;
        };

        let now = Utc::now();
        let scheduled_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        let event = RetryEvent {
            attempt,
            error,
            delay,
            scheduled_at,
        };

        if catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
            tracing::warn!(attempt, "on_retry hook panicked; continuing retry loop");
        }
    }
}

impl Default for RetryPolicy {
    /// Defaults: 3 retries, default [`ExponentialBackoff`], no timeout,
    /// default classifier.
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("has_on_retry", &self.on_retry.is_some())
            .field("has_cancellation", &self.cancellation.is_some())
            .field("seeded", &self.rng.is_some())
            .field("respect_retry_after", &self.respect_retry_after)
            .finish()
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Default)]
pub struct RetryPolicyBuilder {
    max_retries: Option<u32>,
    backoff: Option<ExponentialBackoff>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    factor: Option<f64>,
    jitter: Option<Jitter>,
    attempt_timeout: Option<Duration>,
    classifier: Option<Classifier>,
    on_retry: Option<RetryHook>,
    cancellation: Option<CancellationToken>,
    seed: Option<u64>,
    respect_retry_after: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Set the maximum number of retry attempts.
    ///
    /// Default: 3
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Use a fully configured backoff calculator. Individual backoff setters
    /// called on this builder override its fields.
    pub fn backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the exponential growth factor.
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = Some(factor);
        self
    }

    /// Set the jitter mode.
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Race every attempt against this timeout.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Replace the default failure classifier.
    pub fn classifier<C>(mut self, classifier: C) -> Self
    where
        C: Fn(&(dyn Error + 'static), u32) -> bool + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Install an observability hook called before each retry sleep.
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryEvent<'_>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Abort the retry loop when `token` is cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Draw jitter from a deterministic RNG seeded with `seed`.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Whether a server-provided retry-after hint replaces the computed delay.
    ///
    /// Default: true
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = Some(respect);
        self
    }

    /// Build the `RetryPolicy` instance.
    pub fn build(self) -> RetryPolicy {
        let template = self.backoff.unwrap_or_default();
        let backoff = ExponentialBackoff::builder()
            .base_delay(self.base_delay.unwrap_or(template.base_delay()))
            .max_delay(self.max_delay.unwrap_or(template.max_delay()))
            .factor(self.factor.unwrap_or(template.factor()))
            .jitter(self.jitter.unwrap_or(template.jitter()))
            .build();

        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(3),
            backoff,
            attempt_timeout: self.attempt_timeout,
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(default_is_retryable) as Classifier),
            on_retry: self.on_retry,
            cancellation: self.cancellation,
            rng: self
                .seed
                .map(|seed| Arc::new(Mutex::new(StdRng::seed_from_u64(seed)))),
            respect_retry_after: self.respect_retry_after.unwrap_or(true),
        }
    }
}
