//! Background claim renewal
//!
//! One [`ClaimRenewal`] per audience keeps that audience's token fresh:
//! it sleeps until shortly before expiry, renegotiates, and on failure
//! retries after a fixed interval instead of failing the owning link.
//! Successful renewals are at least [`MIN_REFRESH_INTERVAL`] apart, so a
//! token shorter-lived than the refresh threshold does not renew in a loop.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use busline_domain::BusResult;

/// Shortest wait between two successful renewals.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Timing parameters for a renewal loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalTiming {
    /// Renew this long before the token expires.
    pub refresh_threshold: Duration,
    /// Wait this long after a failed renewal.
    pub retry_interval: Duration,
}

/// Handle to a running renewal task.
///
/// Dropping the handle cancels the task without waiting; [`stop`] cancels
/// and waits for it to exit.
///
/// [`stop`]: ClaimRenewal::stop
#[derive(Debug)]
pub struct ClaimRenewal {
    audience: String,
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ClaimRenewal {
    /// Spawn the renewal loop for a token that expires at `first_expiry`.
    ///
    /// `renew` renegotiates the claim and returns the new expiry.
    pub fn spawn<F, Fut>(
        audience: String,
        first_expiry: DateTime<Utc>,
        timing: RenewalTiming,
        renew: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BusResult<DateTime<Utc>>> + Send + 'static,
    {
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();
        let task_audience = audience.clone();

        let handle = tokio::spawn(async move {
            let mut wait = until_refresh(first_expiry, timing.refresh_threshold);

            loop {
                debug!(audience = %task_audience, ?wait, "Claim renewal scheduled");

                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(wait) => {}
                }

                let result = tokio::select! {
                    () = token.cancelled() => break,
                    result = renew() => result,
                };

                match result {
                    Ok(expiry) => {
                        info!(audience = %task_audience, %expiry, "Claim renewed");
                        wait = until_refresh(expiry, timing.refresh_threshold)
                            .max(MIN_REFRESH_INTERVAL);
                    }
                    Err(err) => {
                        error!(
                            audience = %task_audience,
                            error = %err,
                            retry_in = ?timing.retry_interval,
                            "Claim renewal failed"
                        );
                        wait = timing.retry_interval;
                    }
                }
            }

            debug!(audience = %task_audience, "Claim renewal stopped");
        });

        Self { audience, cancellation, handle: Some(handle) }
    }

    /// Audience this renewal negotiates for.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Cancel the renewal task and wait until it has exited.
    pub async fn stop(mut self) {
        self.cancellation.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!(audience = %self.audience, error = %err, "Claim renewal task panicked");
            }
        }
    }
}

impl Drop for ClaimRenewal {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

fn until_refresh(expiry: DateTime<Utc>, threshold: Duration) -> Duration {
    (expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO).saturating_sub(threshold)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use busline_domain::BusError;
    use chrono::TimeDelta;

    use super::*;

    fn timing() -> RenewalTiming {
        RenewalTiming {
            refresh_threshold: Duration::from_secs(5 * 60),
            retry_interval: Duration::from_secs(60),
        }
    }

    /// Validates that renewal happens shortly before expiry and repeats.
    ///
    /// Assertions:
    /// - Confirms no renewal ran before the refresh point.
    /// - Confirms one renewal ran after the refresh point.
    #[tokio::test(start_paused = true)]
    async fn test_renews_before_expiry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let expiry = Utc::now() + TimeDelta::minutes(10);

        let renewal = ClaimRenewal::spawn("amqps://host/q".into(), expiry, timing(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Utc::now() + TimeDelta::minutes(10)) }
        });

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        renewal.stop().await;
    }

    /// Validates the fixed retry interval after a failed renewal.
    ///
    /// Assertions:
    /// - Confirms a second attempt happens one retry interval after the
    ///   first failure.
    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_retries_after_interval() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let renewal = ClaimRenewal::spawn("aud".into(), Utc::now(), timing(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(BusError::transport("cbs unavailable")) }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        renewal.stop().await;
    }

    /// Validates that short-lived tokens do not renew back to back.
    ///
    /// Assertions:
    /// - Confirms a token inside the refresh threshold renews once at once.
    /// - Confirms the next renewal waits for the minimum interval.
    #[tokio::test(start_paused = true)]
    async fn test_short_lived_token_renews_at_minimum_interval() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let expiry = Utc::now() + TimeDelta::minutes(2);

        let renewal = ClaimRenewal::spawn("aud".into(), expiry, timing(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Utc::now() + TimeDelta::minutes(2)) }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(MIN_REFRESH_INTERVAL - Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        renewal.stop().await;
    }

    /// Validates that `stop` waits for the task and no renewal follows.
    ///
    /// Assertions:
    /// - Confirms the call count stays at zero after stop and a long sleep.
    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_task() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let expiry = Utc::now() + TimeDelta::minutes(6);

        let renewal = ClaimRenewal::spawn("aud".into(), expiry, timing(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Utc::now() + TimeDelta::minutes(6)) }
        });
        assert_eq!(renewal.audience(), "aud");

        renewal.stop().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
