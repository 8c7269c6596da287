//! Per-job scratch resources.
//!
//! A scratch resource is a temporary allocation a job needs while it runs,
//! such as an off-screen render target. The batch runner allocates one per
//! job before the first attempt, hands it to every attempt of that job, and
//! releases it exactly once when the job settles, whatever the outcome.

use async_trait::async_trait;
use std::convert::Infallible;

/// A temporary per-job allocation that must be released deterministically.
///
/// `release` takes `&self` because attempts that lost a timeout race may still
/// hold a reference while they finish in the background.
///
/// # Examples
///
/// ```rust
/// use steadfast_batch::ScratchResource;
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct RenderTarget {
///     released: AtomicBool,
/// }
///
/// #[async_trait]
/// impl ScratchResource for RenderTarget {
///     type Error = std::io::Error;
///
///     async fn release(&self) -> Result<(), Self::Error> {
///         self.released.store(true, Ordering::SeqCst);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ScratchResource: Send + Sync + 'static {
    /// Error type for release failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Release the resource. Called exactly once per job.
    ///
    /// A failed release is logged by the runner; it does not change the
    /// job's outcome.
    async fn release(&self) -> Result<(), Self::Error>;
}

/// "No scratch needed."
#[async_trait]
impl ScratchResource for () {
    type Error = Infallible;

    async fn release(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}
