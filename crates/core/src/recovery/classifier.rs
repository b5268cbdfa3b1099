//! Recovery classifier
//!
//! Maps every [`BusError`] to the layer that has to be rebuilt before the
//! failed operation can be retried. Rules are evaluated in order; the first
//! match wins:
//!
//! 1. Caller cancellation or deadline (including transport errors that only
//!    carry that text) is `Fatal`.
//! 2. Transport EOF is `Connection`.
//! 3. The explicit non-retriable marker is `Fatal`.
//! 4. Session or link closed, or a detach, is `Link`.
//! 5. Connection closed is `Connection`.
//! 6. The transient "link is currently draining" condition is `None`.
//! 7. Structured protocol errors go through the condition table.
//! 8. Management status codes: 401 and 410 are `Link`; 408, 500 and 503 are
//!    `None`.
//! 9. Anything else is `Fatal`.
//!
//! Remaining transport failures (socket resets and the like) are
//! `Connection`.

use busline_domain::constants::{conditions, LINK_DRAINING_MESSAGE};
use busline_domain::{BusError, RecoveryKind};

/// Classify `err` into the recovery action it requires.
#[must_use]
pub fn classify(err: &BusError) -> RecoveryKind {
    if err.is_cancellation() {
        return RecoveryKind::Fatal;
    }

    match err {
        BusError::Eof => RecoveryKind::Connection,
        BusError::NonRetriable(_) => RecoveryKind::Fatal,
        BusError::SessionClosed | BusError::LinkClosed | BusError::Detached { .. } => {
            RecoveryKind::Link
        }
        BusError::ConnectionClosed => RecoveryKind::Connection,
        BusError::Transport(message) if message.contains(LINK_DRAINING_MESSAGE) => {
            RecoveryKind::None
        }
        BusError::Transport(_) => RecoveryKind::Connection,
        BusError::Protocol { condition, .. } => classify_condition(condition),
        BusError::Management { code, .. } => classify_status(*code),
        BusError::Aggregate(errors) => {
            errors.iter().map(classify).max().unwrap_or(RecoveryKind::Fatal)
        }
        BusError::Cancelled
        | BusError::DeadlineExceeded
        | BusError::Closed
        | BusError::MessageTooLarge { .. }
        | BusError::Malformed { .. }
        | BusError::InvalidInput(_)
        | BusError::Config(_) => RecoveryKind::Fatal,
    }
}

/// Predicate handed to the generic retrier.
#[must_use]
pub fn is_fatal(err: &BusError) -> bool {
    classify(err) == RecoveryKind::Fatal
}

fn classify_condition(condition: &str) -> RecoveryKind {
    match condition {
        conditions::SERVER_BUSY | conditions::TIMEOUT | conditions::OPERATION_CANCELLED => {
            RecoveryKind::None
        }
        conditions::DETACH_FORCED => RecoveryKind::Link,
        conditions::CONNECTION_FORCED => RecoveryKind::Connection,
        // Documented fatal conditions.
        conditions::MESSAGE_SIZE_EXCEEDED
        | conditions::UNAUTHORIZED_ACCESS
        | conditions::NOT_FOUND
        | conditions::NOT_ALLOWED
        | conditions::INTERNAL_ERROR
        | conditions::ENTITY_DISABLED
        | conditions::SESSION_CANNOT_BE_LOCKED
        | conditions::MESSAGE_LOCK_LOST => RecoveryKind::Fatal,
        _ => RecoveryKind::Fatal,
    }
}

const fn classify_status(code: i64) -> RecoveryKind {
    match code {
        // 401 after a recovery race (claim not yet renegotiated), 410 session
        // lock expired.
        401 | 410 => RecoveryKind::Link,
        408 | 500 | 503 => RecoveryKind::None,
        _ => RecoveryKind::Fatal,
    }
}
