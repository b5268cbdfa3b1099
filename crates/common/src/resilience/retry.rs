//! Bounded retry loop with exponential backoff and jitter
//!
//! The loop runs the first attempt immediately and sleeps before every later
//! attempt. A caller-supplied predicate decides whether an error is fatal;
//! fatal errors stop the loop at once. When the attempts run out the last
//! error is returned as-is so the caller sees the real cause.
//!
//! Long-lived operations (for example "keep receiving until cancelled") can
//! call [`RetryFnArgs::reset_attempts`] after making progress. The attempt
//! counter then restarts at zero, so such an operation never exhausts its
//! retries as long as it keeps succeeding periodically.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::{Context, ContextError};
use crate::utils::serde::duration_millis;

/// Lower bound of the jitter multiplier applied to each delay.
pub const JITTER_MIN: f64 = 0.8;
/// Upper bound (exclusive) of the jitter multiplier applied to each delay.
pub const JITTER_MAX: f64 = 1.3;

/// Invalid retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid retry configuration: {message}")]
pub struct RetryConfigError {
    /// What is wrong with the configuration
    pub message: String,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Maximum number of retries after the first attempt. Zero disables
    /// retrying entirely.
    pub max_retries: u32,

    /// Base delay; attempt `n` waits roughly `(2^n - 1) * retry_delay`.
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    /// Upper bound on any single delay.
    #[serde(with = "duration_millis")]
    pub max_retry_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(4),
            max_retry_delay: Duration::from_secs(120),
        }
    }
}

impl RetryOptions {
    /// Options that make exactly one attempt.
    #[must_use]
    pub fn only_once() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Set the maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base and maximum delays.
    #[must_use]
    pub fn delays(mut self, retry_delay: Duration, max_retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self.max_retry_delay = max_retry_delay;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns an error when the maximum delay is below the base delay.
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.max_retry_delay < self.retry_delay {
            return Err(RetryConfigError {
                message: format!(
                    "max_retry_delay ({:?}) must not be less than retry_delay ({:?})",
                    self.max_retry_delay, self.retry_delay
                ),
            });
        }
        Ok(())
    }

    /// Delay before `attempt` (1-based for retries) without jitter, capped at
    /// `max_retry_delay`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(62) as i32) - 1.0;
        let millis = factor * self.retry_delay.as_millis() as f64;
        let capped = millis.min(self.max_retry_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before `attempt` with jitter in `[JITTER_MIN, JITTER_MAX)`
    /// applied, capped at `max_retry_delay`.
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(62) as i32) - 1.0;
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX);
        let millis = factor * self.retry_delay.as_millis() as f64 * jitter;
        let capped = millis.min(self.max_retry_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Per-attempt state handed to the retried operation.
#[derive(Debug, Clone)]
pub struct RetryFnArgs<E> {
    /// Current attempt number (0-based, restarts after a reset)
    pub attempt: u32,
    /// Error returned by the previous attempt, if any
    pub last_err: Option<E>,
    reset: Arc<AtomicBool>,
}

impl<E> RetryFnArgs<E> {
    /// Restart the attempt counter after this attempt completes.
    pub fn reset_attempts(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }
}

/// Run `operation` until it succeeds, returns a fatal error, or the retries
/// in `options` are exhausted.
///
/// # Errors
/// Returns the fatal error, the last error once attempts are exhausted, or
/// the context error converted into `E` if `ctx` finishes while sleeping.
pub async fn retry<T, E, F, Fut, P>(
    ctx: &Context,
    name: &str,
    options: &RetryOptions,
    is_fatal: P,
    mut operation: F,
) -> Result<T, E>
where
    E: Clone + std::fmt::Display + From<ContextError>,
    F: FnMut(RetryFnArgs<E>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;
    let mut last_err: Option<E> = None;

    loop {
        if attempt > 0 {
            let delay = options.calculate_delay(attempt);
            debug!(operation = name, attempt, ?delay, "Sleeping before retry");
            ctx.sleep(delay).await.map_err(E::from)?;
        }

        let reset = Arc::new(AtomicBool::new(false));
        let args = RetryFnArgs { attempt, last_err: last_err.clone(), reset: Arc::clone(&reset) };

        let result = operation(args).await;

        if reset.load(Ordering::SeqCst) {
            debug!(operation = name, "Attempt counter reset by operation");
            attempt = 0;
        } else {
            attempt += 1;
        }

        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if is_fatal(&err) {
                    debug!(operation = name, error = %err, "Stopping retries, error is fatal");
                    return Err(err);
                }
                if attempt > options.max_retries {
                    warn!(
                        operation = name,
                        attempts = attempt,
                        error = %err,
                        "All retry attempts exhausted"
                    );
                    return Err(err);
                }
                warn!(operation = name, attempt, error = %err, "Operation failed, will retry");
                last_err = Some(err);
            }
        }
    }
}
