//! Error returned by the client facades

use std::time::Duration;

use busline_common::{ErrorClassification, ErrorSeverity};
use busline_domain::constants::conditions;
use busline_domain::{BusError, RecoveryKind};
use thiserror::Error;

use crate::recovery::classify;

/// Suggested pause before retrying after the broker reported it is busy.
pub const SERVER_BUSY_RETRY_AFTER: Duration = Duration::from_secs(10);

/// A failed client operation and the recovery it called for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{source}")]
pub struct ClientError {
    pub recovery: RecoveryKind,
    pub source: BusError,
}

pub type ClientResult<T> = Result<T, ClientError>;

impl From<BusError> for ClientError {
    fn from(source: BusError) -> Self {
        Self { recovery: classify(&source), source }
    }
}

impl ClientError {
    /// True when the caller closed the client or entity itself.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.source == BusError::Closed
    }
}

impl ErrorClassification for ClientError {
    fn is_retryable(&self) -> bool {
        self.recovery != RecoveryKind::Fatal
    }

    fn severity(&self) -> ErrorSeverity {
        match self.recovery {
            RecoveryKind::None => ErrorSeverity::Info,
            RecoveryKind::Link | RecoveryKind::Connection => ErrorSeverity::Warning,
            RecoveryKind::Fatal if self.source.is_cancellation() => ErrorSeverity::Info,
            RecoveryKind::Fatal if self.is_critical() => ErrorSeverity::Critical,
            RecoveryKind::Fatal => ErrorSeverity::Error,
        }
    }

    /// Credentials or entity configuration are wrong; retrying cannot help.
    fn is_critical(&self) -> bool {
        matches!(
            &self.source,
            BusError::Protocol { condition, .. }
                if condition == conditions::UNAUTHORIZED_ACCESS
                    || condition == conditions::NOT_FOUND
                    || condition == conditions::ENTITY_DISABLED
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match &self.source {
            BusError::Protocol { condition, .. } if condition == conditions::SERVER_BUSY => {
                Some(SERVER_BUSY_RETRY_AFTER)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates classification of wrapped errors.
    ///
    /// Assertions:
    /// - Confirms link errors are retryable warnings.
    /// - Confirms cancellation is fatal but informational.
    /// - Confirms unauthorized access is critical.
    /// - Confirms server-busy suggests a retry delay.
    #[test]
    fn test_client_error_classification() {
        let link = ClientError::from(BusError::LinkClosed);
        assert_eq!(link.recovery, RecoveryKind::Link);
        assert!(link.is_retryable());
        assert_eq!(link.severity(), ErrorSeverity::Warning);

        let cancelled = ClientError::from(BusError::Cancelled);
        assert!(!cancelled.is_retryable());
        assert_eq!(cancelled.severity(), ErrorSeverity::Info);

        let denied = ClientError::from(BusError::protocol(conditions::UNAUTHORIZED_ACCESS, "no"));
        assert!(denied.is_critical());
        assert_eq!(denied.severity(), ErrorSeverity::Critical);

        let busy = ClientError::from(BusError::protocol(conditions::SERVER_BUSY, "busy"));
        assert_eq!(busy.retry_after(), Some(SERVER_BUSY_RETRY_AFTER));
        assert_eq!(busy.to_string(), busy.source.to_string());

        assert!(ClientError::from(BusError::Closed).is_closed());
    }
}
