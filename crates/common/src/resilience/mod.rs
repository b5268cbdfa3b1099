//! Resilience patterns for fault tolerance
//!
//! Provides the bounded retry loop used by every broker operation. The loop
//! is generic over the error type; callers decide which errors are fatal and
//! may plug recovery in between attempts.

pub mod retry;

pub use retry::{retry, RetryConfigError, RetryFnArgs, RetryOptions};
