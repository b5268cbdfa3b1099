//! Shared error classification
//!
//! Error types across the busline crates implement [`ErrorClassification`]
//! so that callers can make retry and alerting decisions without matching on
//! crate-specific variants.
//!
//! ```rust,ignore
//! use busline_common::{ErrorClassification, ErrorSeverity};
//!
//! fn report<E: ErrorClassification + std::fmt::Display>(err: &E) {
//!     if err.is_critical() {
//!         tracing::error!(severity = %err.severity(), error = %err, "Critical failure");
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Standard interface for classifying errors by their characteristics.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: a later attempt (possibly after
    /// recovering the underlying link or connection) may succeed.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates severity ordering and display labels.
    ///
    /// Assertions:
    /// - Confirms `Info < Warning < Error < Critical`.
    /// - Confirms `ErrorSeverity::Warning` displays as `WARN`.
    #[test]
    fn test_severity_ordering_and_display() {
        assert!(ErrorSeverity::Info < ErrorSeverity::Warning);
        assert!(ErrorSeverity::Warning < ErrorSeverity::Error);
        assert!(ErrorSeverity::Error < ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Warning.to_string(), "WARN");
    }
}
