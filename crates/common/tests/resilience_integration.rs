//! Integration tests for the retry loop and cancellation context
//!
//! Exercises the public `busline_common` surface the way broker operations
//! use it: a retried operation racing a context deadline.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use busline_common::{retry, Context, ContextError, RetryOptions};

/// Error type for exercising the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
enum OpError {
    Busy,
    Context(ContextError),
}

impl std::fmt::Display for OpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "server busy"),
            Self::Context(e) => write!(f, "{e}"),
        }
    }
}

impl From<ContextError> for OpError {
    fn from(err: ContextError) -> Self {
        Self::Context(err)
    }
}

/// Validates that a context deadline bounds the whole retry loop.
///
/// Ensures a permanently failing operation with generous retries is cut off
/// by the deadline while sleeping between attempts.
///
/// Assertions:
/// - Confirms the result is `DeadlineExceeded`.
/// - Confirms fewer attempts ran than `max_retries + 1`.
#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_retry_loop() {
    let calls = Arc::new(AtomicU32::new(0));
    let ctx = Context::background().with_timeout(Duration::from_millis(500));
    let options = RetryOptions::default()
        .max_retries(10)
        .delays(Duration::from_millis(100), Duration::from_secs(5));

    let counter = Arc::clone(&calls);
    let result: Result<(), OpError> = retry(&ctx, "deadline", &options, |_| false, |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err(OpError::Busy) }
    })
    .await;

    assert_eq!(result, Err(OpError::Context(ContextError::DeadlineExceeded)));
    assert!(calls.load(Ordering::SeqCst) < 11);
}

/// Validates that `only_once` makes a single attempt.
///
/// Assertions:
/// - Confirms the transient error is returned unchanged.
/// - Confirms exactly one invocation.
#[tokio::test]
async fn test_only_once_makes_single_attempt() {
    let calls = AtomicU32::new(0);

    let result: Result<(), OpError> =
        retry(&Context::background(), "once", &RetryOptions::only_once(), |_| false, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OpError::Busy) }
        })
        .await;

    assert_eq!(result, Err(OpError::Busy));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Validates that retry options round-trip through their serde form in
/// milliseconds.
///
/// Assertions:
/// - Confirms a partial JSON object fills the remaining fields with defaults.
#[test]
fn test_retry_options_from_partial_json() {
    let options: RetryOptions = serde_json::from_str(r#"{"max_retries":7,"retry_delay":250}"#)
        .expect("retry options should deserialize");

    assert_eq!(options.max_retries, 7);
    assert_eq!(options.retry_delay, Duration::from_millis(250));
    assert_eq!(options.max_retry_delay, Duration::from_secs(120));
}
