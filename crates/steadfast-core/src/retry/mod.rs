//! Retry executor with exponential backoff.
//!
//! # Key Types
//!
//! - [`ExponentialBackoff`] - Pure delay calculator with [`Jitter`] modes
//! - [`RetryPolicy`] - Attempt cap, backoff, timeout, classifier and hooks
//! - [`Retrying`] - Decorator produced by [`with_retry`]
//!
//! # Examples
//!
//! ```rust
//! use steadfast_core::retry::{Jitter, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .base_delay(Duration::from_millis(100))
//!     .jitter(Jitter::Full)
//!     .build();
//!
//! let result = policy.execute(|| async {
//!     // Your operation here
//!     Ok::<_, std::io::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

mod executor;
mod exponential;
mod policy;

pub use executor::{Retrying, with_retry};
pub use exponential::{ExponentialBackoff, ExponentialBackoffBuilder, Jitter};
pub use policy::{AttemptContext, Classifier, RetryEvent, RetryHook, RetryPolicy, RetryPolicyBuilder};
