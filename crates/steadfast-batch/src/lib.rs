#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Bounded-concurrency batch execution on top of `steadfast-core` retries.
//!
//! A [`BatchRunner`] drains a queue of independent job inputs with a fixed
//! number of worker loops. Every job goes through the runner's
//! [`RetryPolicy`](steadfast_core::retry::RetryPolicy), gets its own
//! [`ScratchResource`] released exactly once, and ends up as a
//! [`JobOutcome`] in the returned [`BatchReport`].
//!
//! Individual failures never stop the batch unless the runner is configured
//! with [`FailureMode::AbortOnFirstFailure`].
//!
//! # Examples
//!
//! ```rust
//! use steadfast_batch::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let runner = BatchRunner::builder()
//!     .concurrency(2)
//!     .policy(RetryPolicy::builder().base_delay(Duration::from_millis(10)).build())
//!     .build();
//!
//! let report = runner
//!     .run(vec!["a", "b", "c"], |name| async move {
//!         Ok::<_, OperationError>(name.to_uppercase())
//!     })
//!     .await;
//!
//! assert!(report.is_complete());
//! assert_eq!(report.success_count(), 3);
//! # }
//! ```

pub mod config;
pub mod report;
pub mod runner;
pub mod scratch;

pub use config::BatchConfig;
pub use report::{BatchReport, JobId, JobOutcome};
pub use runner::{BatchRunner, BatchRunnerBuilder, FailureMode, ProgressHook};
pub use scratch::ScratchResource;

/// Convenient re-exports for batch callers, including the core retry types.
pub mod prelude {
    pub use crate::config::BatchConfig;
    pub use crate::report::{BatchReport, JobId, JobOutcome};
    pub use crate::runner::{BatchRunner, FailureMode};
    pub use crate::scratch::ScratchResource;
    pub use steadfast_core::prelude::*;
}
