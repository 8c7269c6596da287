//! The retry loop and the `with_retry` decorator.

use std::error::Error;
use std::future::Future;
use std::panic::resume_unwind;
use std::time::Duration;

use super::policy::{AttemptContext, RetryPolicy};
use crate::cancel::CancellationToken;
use crate::error::{AttemptTimeout, RetryError};

/// How a single attempt failed.
enum Failure<E> {
    Operation(E),
    Timeout(AttemptTimeout),
}

impl<E: Error + 'static> Failure<E> {
    fn as_error(&self) -> &(dyn Error + 'static) {
        match self {
            Failure::Operation(err) => err,
            Failure::Timeout(timeout) => timeout,
        }
    }

    fn into_retry_error(self, attempts: u32) -> RetryError<E> {
        match self {
            Failure::Operation(source) => RetryError::Operation { source, attempts },
            Failure::Timeout(AttemptTimeout { timeout }) => RetryError::Timeout { timeout, attempts },
        }
    }
}

enum Attempt<T, E> {
    Settled(Result<T, Failure<E>>),
    Cancelled,
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

impl RetryPolicy {
    /// Execute an operation with retry logic.
    ///
    /// The operation is called repeatedly until it succeeds, the classifier
    /// rejects a failure, or `max_retries` retries have been used. On failure
    /// the *last* observed error is returned.
    ///
    /// With a per-attempt timeout configured, each attempt is spawned onto the
    /// tokio runtime and raced against the timeout. An attempt that loses the
    /// race keeps running in the background and its result is discarded.
    ///
    /// A cancelled token stops the loop before the next attempt, during an
    /// attempt, or in the middle of a backoff sleep.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use steadfast_core::retry::RetryPolicy;
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicU32, Ordering};
    /// use std::time::Duration;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let policy = RetryPolicy::builder()
    ///     .max_retries(3)
    ///     .base_delay(Duration::from_millis(10))
    ///     .build();
    ///
    /// let attempts = Arc::new(AtomicU32::new(0));
    /// let value = policy
    ///     .execute(|| {
    ///         let attempts = Arc::clone(&attempts);
    ///         async move {
    ///             if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
    ///                 Err(std::io::Error::other("retry me"))
    ///             } else {
    ///                 Ok(42)
    ///             }
    ///         }
    ///     })
    ///     .await?;
    /// assert_eq!(value, 42);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Error + Send + 'static,
    {
        let mut previous_delay = None;
        let mut attempt: u32 = 0;

        loop {
            if self.cancellation().is_some_and(CancellationToken::is_cancelled) {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            let ctx = AttemptContext::new(attempt, previous_delay);
            let failure = match self.run_attempt(&operation).await {
                Attempt::Settled(Ok(value)) => {
                    if attempt > 0 {
                        tracing::debug!(attempts = attempt + 1, "operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Attempt::Settled(Err(failure)) => failure,
                Attempt::Cancelled => {
                    return Err(RetryError::Cancelled {
                        attempts: attempt + 1,
                    });
                }
            };

            let delay = self.plan_retry(failure, &ctx)?;

            tokio::select! {
                biased;
                _ = cancelled(self.cancellation()) => {
                    tracing::debug!(attempt, "cancelled during backoff");
                    return Err(RetryError::Cancelled { attempts: attempt + 1 });
                }
                _ = tokio::time::sleep(delay) => {}
            }

            previous_delay = Some(delay);
            attempt += 1;
        }
    }

    /// Decide what happens after a failed attempt: a delay to sleep, or the
    /// final error.
    fn plan_retry<E>(&self, failure: Failure<E>, ctx: &AttemptContext) -> Result<Duration, RetryError<E>>
    where
        E: Error + 'static,
    {
        let attempt = ctx.attempt;
        let error = failure.as_error();

        if !self.should_retry(error, attempt) {
            tracing::warn!(attempt, error = %error, "non-retryable failure");
            return Err(failure.into_retry_error(attempt + 1));
        }
        if attempt >= self.max_retries() {
            tracing::warn!(attempts = attempt + 1, error = %error, "retries exhausted");
            return Err(failure.into_retry_error(attempt + 1));
        }

        let delay = self.next_delay(ctx, error);
        self.notify_retry(attempt, error, delay);
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            attempt_ms = ctx.started_at.elapsed().as_millis() as u64,
            error = %error,
            "attempt failed; retrying"
        );
        Ok(delay)
    }

    async fn run_attempt<F, Fut, T, E>(&self, operation: &F) -> Attempt<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let Some(timeout) = self.attempt_timeout() else {
            return tokio::select! {
                biased;
                _ = cancelled(self.cancellation()) => Attempt::Cancelled,
                result = operation() => Attempt::Settled(result.map_err(Failure::Operation)),
            };
        };

        let mut handle = tokio::spawn(operation());
        tokio::select! {
            biased;
            _ = cancelled(self.cancellation()) => {
                handle.abort();
                Attempt::Cancelled
            }
            joined = &mut handle => match joined {
                Ok(result) => Attempt::Settled(result.map_err(Failure::Operation)),
                Err(err) if err.is_panic() => resume_unwind(err.into_panic()),
                Err(_) => Attempt::Cancelled,
            },
            _ = tokio::time::sleep(timeout) => {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "attempt timed out; leaving it to finish in the background");
                Attempt::Settled(Err(Failure::Timeout(AttemptTimeout { timeout })))
            }
        }
    }
}

/// A zero-argument operation bound to a [`RetryPolicy`].
///
/// Created by [`with_retry`]. Every [`call`](Retrying::call) runs the full
/// retry loop from attempt 0.
#[derive(Debug, Clone)]
pub struct Retrying<F> {
    operation: F,
    policy: RetryPolicy,
}

impl<F> Retrying<F> {
    /// The policy applied on every call.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run the retrying version of the wrapped operation.
    pub async fn call<Fut, T, E>(&self) -> Result<T, RetryError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Error + Send + 'static,
    {
        self.policy.execute(&self.operation).await
    }
}

/// Turn a single-shot async operation into a retrying one.
///
/// # Examples
///
/// ```rust
/// use steadfast_core::retry::{RetryPolicy, with_retry};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetch = with_retry(|| async { Ok::<_, std::io::Error>("record") }, RetryPolicy::default());
/// assert_eq!(fetch.call().await?, "record");
/// # Ok(())
/// # }
/// ```
pub fn with_retry<F>(operation: F, policy: RetryPolicy) -> Retrying<F> {
    Retrying { operation, policy }
}
