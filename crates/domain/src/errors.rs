//! Error types used throughout the client

use busline_common::ContextError;
use thiserror::Error;

/// Main error type for broker link, RPC, settlement and receive operations.
///
/// `Clone` so that the retrier can hand the previous error to the next
/// attempt and the RPC router can broadcast one terminal error to every
/// pending caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The transport reached end of stream.
    #[error("EOF")]
    Eof,

    /// Marker for an error that must never be retried.
    #[error("non-retriable error: {0}")]
    NonRetriable(String),

    #[error("amqp: session closed")]
    SessionClosed,

    #[error("amqp: link closed")]
    LinkClosed,

    /// The remote detached the link.
    #[error("link detached, condition: {condition}, description: {description}")]
    Detached { condition: String, description: String },

    #[error("amqp: connection closed")]
    ConnectionClosed,

    /// Generic transport failure surfaced by the AMQP substrate.
    #[error("transport error: {0}")]
    Transport(String),

    /// A structured AMQP error with a condition.
    #[error("{condition}: {description}")]
    Protocol { condition: String, description: String },

    /// A management RPC returned a non-2xx status.
    #[error("management request failed with status {code}: {description}")]
    Management { code: i64, description: String },

    /// The link set or namespace was closed permanently by its owner.
    #[error("link has been closed permanently")]
    Closed,

    #[error("message of {size} bytes exceeds the maximum message size of {max} bytes")]
    MessageTooLarge { size: u64, max: u64 },

    /// A management response or message could not be decoded.
    #[error("malformed {field}: {message}")]
    Malformed { field: String, message: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Several errors collected during a best-effort operation.
    #[error("multiple errors: {}", join_errors(.0))]
    Aggregate(Vec<BusError>),
}

fn join_errors(errors: &[BusError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl BusError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn protocol(condition: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Protocol { condition: condition.into(), description: description.into() }
    }

    pub fn detached(condition: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Detached { condition: condition.into(), description: description.into() }
    }

    pub fn management(code: i64, description: impl Into<String>) -> Self {
        Self::Management { code, description: description.into() }
    }

    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed { field: field.into(), message: message.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// True for caller cancellation, including transport errors that only
    /// carry the cancellation text.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled | Self::DeadlineExceeded => true,
            Self::Transport(message) => {
                message.contains("context canceled") || message.contains("context deadline exceeded")
            }
            _ => false,
        }
    }

    /// Collapse a list of errors: none → `Ok`, one → that error, more →
    /// [`BusError::Aggregate`].
    pub fn join(mut errors: Vec<Self>) -> BusResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }
}

impl From<ContextError> for BusError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => Self::Cancelled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed("message", err.to_string())
    }
}

/// Result type alias for broker operations
pub type BusResult<T> = std::result::Result<T, BusError>;
