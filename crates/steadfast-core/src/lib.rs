#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Resilient execution of flaky async operations.
//!
//! This crate provides the retry layer the rest of the Steadfast workspace is
//! built on:
//!
//! - **Backoff calculation** via [`retry::ExponentialBackoff`]
//!   - Exponential growth clamped into `[base_delay, max_delay]`
//!   - `none`, `full`, `equal` and `decorrelated` jitter
//! - **Retry execution** via [`retry::RetryPolicy::execute`] and [`retry::with_retry`]
//!   - Per-attempt timeouts
//!   - Pluggable failure classifier with a sensible default
//!   - `on_retry` observability hook
//!   - Cooperative cancellation via [`CancellationToken`]
//! - **Failure classification** via [`classify`]
//! - **Serializable configuration** via [`config::RetryConfig`]
//!
//! # Examples
//!
//! Using the prelude for convenient imports:
//!
//! ```rust
//! use steadfast_core::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .base_delay(Duration::from_millis(100))
//!     .build();
//!
//! let result = policy.execute(|| async {
//!     Ok::<_, std::io::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod classify;
pub mod config;
pub mod error;
pub mod retry;

pub use cancel::CancellationToken;

/// Convenient re-exports of commonly used items.
///
/// Import all core abstractions with:
///
/// ```rust
/// use steadfast_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::classify::{FailureKind, classify, default_is_retryable};
    pub use crate::config::RetryConfig;
    pub use crate::error::{ConfigError, NetworkCode, OperationError, RetryError};
    pub use crate::retry::{
        ExponentialBackoff, Jitter, RetryEvent, RetryPolicy, Retrying, with_retry,
    };
}
