//! Exponential backoff with selectable jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Randomization applied to a computed backoff delay.
///
/// All modes except [`Jitter::Full`] keep the delay inside
/// `[base_delay, max_delay]`. Full jitter may go all the way down to zero so
/// that many clients failing at once spread out their retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// Deterministic exponential delay.
    #[default]
    None,
    /// Uniform in `[0, capped]`.
    Full,
    /// `capped / 2` plus a uniform draw in `[0, capped / 2]`.
    Equal,
    /// Uniform up to `previous * factor`, clamped into `[base_delay, max_delay]`.
    Decorrelated,
}

impl std::str::FromStr for Jitter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Jitter::None),
            "full" => Ok(Jitter::Full),
            "equal" => Ok(Jitter::Equal),
            "decorrelated" => Ok(Jitter::Decorrelated),
            other => Err(format!("unknown jitter mode '{other}'")),
        }
    }
}

/// Exponential backoff calculator.
///
/// Delays grow as `base_delay * factor^attempt`, clamped into
/// `[base_delay, max_delay]`, and are then randomized according to the
/// configured [`Jitter`].
///
/// # Mathematical Formula
///
/// For attempt `n` (0 is the delay before the first *retry*):
/// ```text
/// raw      = base_delay * factor^n
/// capped   = clamp(raw, base_delay, max_delay)
/// none     -> capped
/// full     -> uniform(0, capped)
/// equal    -> capped/2 + uniform(0, capped/2)
/// decorr.  -> clamp(uniform(0, max(base_delay, previous * factor)), base_delay, max_delay)
/// ```
///
/// The calculator holds no state between calls. Decorrelated jitter needs the
/// previously returned delay, which the caller passes back in.
///
/// # Examples
///
/// ```rust
/// use steadfast_core::retry::{ExponentialBackoff, Jitter};
/// use std::time::Duration;
///
/// let backoff = ExponentialBackoff::builder()
///     .base_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(5))
///     .factor(2.0)
///     .jitter(Jitter::None)
///     .build();
///
/// assert_eq!(backoff.delay(0, None), Duration::from_millis(100));
/// assert_eq!(backoff.delay(2, None), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    factor: f64,
    jitter: Jitter,
}

impl ExponentialBackoff {
    /// Create a new builder for configuring exponential backoff.
    pub fn builder() -> ExponentialBackoffBuilder {
        ExponentialBackoffBuilder::default()
    }

    /// Lower bound of every non-full-jitter delay.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound of every delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Growth factor between consecutive attempts.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Configured jitter mode.
    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Delay before retry `attempt`, drawing randomness from the thread RNG.
    pub fn delay(&self, attempt: u32, previous: Option<Duration>) -> Duration {
        self.delay_with_rng(attempt, previous, &mut rand::thread_rng())
    }

    /// Delay before retry `attempt`, drawing at most one value from `rng`.
    ///
    /// `previous` is the delay returned for the prior retry and only matters for
    /// [`Jitter::Decorrelated`]. `None` means "first retry" and is treated as
    /// `base_delay`.
    pub fn delay_with_rng<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        previous: Option<Duration>,
        rng: &mut R,
    ) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let capped = self.capped_secs(attempt);

        let secs = match self.jitter {
            Jitter::None => capped,
            Jitter::Full => rng.r#gen::<f64>() * capped,
            Jitter::Equal => {
                // at attempt 0 the lower half lies below base, so this collapses to base_delay
                let half = capped / 2.0;
                (half + rng.r#gen::<f64>() * half).clamp(base, max)
            }
            Jitter::Decorrelated => {
                let previous = previous.unwrap_or(self.base_delay).as_secs_f64();
                let from = (previous * self.factor).max(base);
                let from = if from.is_finite() { from } else { max };
                (rng.r#gen::<f64>() * from).clamp(base, max)
            }
        };

        // max_delay near Duration::MAX does not survive the f64 round trip
        Duration::try_from_secs_f64(secs.clamp(0.0, max)).unwrap_or(self.max_delay)
    }

    /// `base_delay * factor^attempt` clamped into `[base_delay, max_delay]`, in seconds.
    fn capped_secs(&self, attempt: u32) -> f64 {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let raw = base * self.factor.powf(f64::from(attempt));
        if raw.is_finite() { raw.clamp(base, max) } else { max }
    }
}

impl Default for ExponentialBackoff {
    /// Defaults: 100ms base, 60s cap, factor 2.0, no jitter.
    fn default() -> Self {
        ExponentialBackoffBuilder::default().build()
    }
}

/// Builder for configuring [`ExponentialBackoff`].
///
/// The builder never fails: a factor below 1 (or non-finite) is raised to 1,
/// and a `max_delay` smaller than `base_delay` is raised to `base_delay`.
#[derive(Debug, Default, Clone)]
pub struct ExponentialBackoffBuilder {
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    factor: Option<f64>,
    jitter: Option<Jitter>,
}

impl ExponentialBackoffBuilder {
    /// Set the delay before the first retry.
    ///
    /// Default: 100ms
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    /// Set the maximum delay between retries.
    ///
    /// Default: 60s
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the exponential growth factor.
    ///
    /// Default: 2.0 (doubles each time)
    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = Some(factor);
        self
    }

    /// Set the jitter mode.
    ///
    /// Default: [`Jitter::None`]
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Build the `ExponentialBackoff` instance.
    pub fn build(self) -> ExponentialBackoff {
        let base_delay = self.base_delay.unwrap_or(Duration::from_millis(100));
        let max_delay = self
            .max_delay
            .unwrap_or(Duration::from_secs(60))
            .max(base_delay);
        let factor = match self.factor {
            Some(f) if f.is_finite() && f >= 1.0 => f,
            Some(_) => 1.0,
            None => 2.0,
        };

        ExponentialBackoff {
            base_delay,
            max_delay,
            factor,
            jitter: self.jitter.unwrap_or_default(),
        }
    }
}
