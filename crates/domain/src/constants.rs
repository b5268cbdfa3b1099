//! Wire-level constants
//!
//! Operation names, request/response field keys, message annotations and
//! error conditions used by the management link and the recovery classifier.
//! These strings are part of the broker contract and must not change.

/// Suffix appended to an entity path to address its management node.
pub const MANAGEMENT_SUFFIX: &str = "$management";

/// Management operation names carried in `application-properties["operation"]`.
pub mod operations {
    pub const UPDATE_DISPOSITION: &str = "com.microsoft:update-disposition";
    pub const RENEW_LOCK: &str = "com.microsoft:renew-lock";
    pub const RENEW_SESSION_LOCK: &str = "com.microsoft:renew-session-lock";
    pub const PEEK_MESSAGE: &str = "com.microsoft:peek-message";
    pub const RECEIVE_BY_SEQUENCE_NUMBER: &str = "com.microsoft:receive-by-sequence-number";
    pub const SCHEDULE_MESSAGE: &str = "com.microsoft:schedule-message";
    pub const CANCEL_SCHEDULED_MESSAGE: &str = "com.microsoft:cancel-scheduled-message";
    pub const GET_SESSION_STATE: &str = "com.microsoft:get-session-state";
    pub const SET_SESSION_STATE: &str = "com.microsoft:set-session-state";
}

/// Application-property keys on management requests and responses.
pub mod properties {
    pub const OPERATION: &str = "operation";
    pub const STATUS_CODE: &str = "status-code";
    pub const STATUS_DESCRIPTION: &str = "status-description";
    /// Legacy-cased fallback for [`STATUS_CODE`].
    pub const LEGACY_STATUS_CODE: &str = "statusCode";
    /// Legacy-cased fallback for [`STATUS_DESCRIPTION`].
    pub const LEGACY_STATUS_DESCRIPTION: &str = "statusDescription";
    pub const SERVER_TIMEOUT: &str = "com.microsoft:server-timeout";
    pub const TRACKING_ID: &str = "com.microsoft:tracking-id";
    pub const ASSOCIATED_LINK_NAME: &str = "associated-link-name";
}

/// Keys inside management request and response bodies.
pub mod fields {
    pub const DISPOSITION_STATUS: &str = "disposition-status";
    pub const LOCK_TOKENS: &str = "lock-tokens";
    pub const LOCK_TOKEN: &str = "lock-token";
    pub const DEADLETTER_REASON: &str = "deadletter-reason";
    pub const DEADLETTER_DESCRIPTION: &str = "deadletter-description";
    pub const PROPERTIES_TO_MODIFY: &str = "properties-to-modify";
    pub const SEQUENCE_NUMBERS: &str = "sequence-numbers";
    pub const FROM_SEQUENCE_NUMBER: &str = "from-sequence-number";
    pub const MESSAGE_COUNT: &str = "message-count";
    pub const RECEIVER_SETTLE_MODE: &str = "receiver-settle-mode";
    pub const SESSION_ID: &str = "session-id";
    pub const SESSION_STATE: &str = "session-state";
    pub const EXPIRATIONS: &str = "expirations";
    pub const EXPIRATION: &str = "expiration";
    pub const MESSAGES: &str = "messages";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PARTITION_KEY: &str = "partition-key";
    pub const VIA_PARTITION_KEY: &str = "via-partition-key";
}

/// Message annotation keys set by the broker or by the scheduler.
pub mod annotations {
    pub const SEQUENCE_NUMBER: &str = "x-opt-sequence-number";
    pub const LOCKED_UNTIL: &str = "x-opt-locked-until";
    pub const ENQUEUED_TIME: &str = "x-opt-enqueued-time";
    pub const SCHEDULED_ENQUEUE_TIME: &str = "x-opt-scheduled-enqueue-time";
    pub const PARTITION_KEY: &str = "x-opt-partition-key";
    pub const VIA_PARTITION_KEY: &str = "x-opt-via-partition-key";
    pub const DEADLETTER_REASON: &str = "DeadLetterReason";
    pub const DEADLETTER_DESCRIPTION: &str = "DeadLetterErrorDescription";
}

/// AMQP error conditions understood by the recovery classifier.
pub mod conditions {
    pub const SERVER_BUSY: &str = "com.microsoft:server-busy";
    pub const TIMEOUT: &str = "com.microsoft:timeout";
    pub const OPERATION_CANCELLED: &str = "com.microsoft:operation-cancelled";
    pub const DETACH_FORCED: &str = "amqp:link:detach-forced";
    pub const CONNECTION_FORCED: &str = "amqp:connection:forced";
    pub const MESSAGE_SIZE_EXCEEDED: &str = "amqp:link:message-size-exceeded";
    pub const UNAUTHORIZED_ACCESS: &str = "amqp:unauthorized-access";
    pub const NOT_FOUND: &str = "amqp:not-found";
    pub const NOT_ALLOWED: &str = "amqp:not-allowed";
    pub const INTERNAL_ERROR: &str = "amqp:internal-error";
    pub const ENTITY_DISABLED: &str = "com.microsoft:entity-disabled";
    pub const SESSION_CANNOT_BE_LOCKED: &str = "com.microsoft:session-cannot-be-locked";
    pub const MESSAGE_LOCK_LOST: &str = "com.microsoft:message-lock-lost";
    /// Condition attached to a rejected delivery to dead-letter it.
    pub const DEAD_LETTER: &str = "com.microsoft:dead-letter";
}

/// Substring the AMQP substrate uses for the transient draining condition.
pub const LINK_DRAINING_MESSAGE: &str = "link is currently draining";

/// Receiver settle mode values used by `receive-by-sequence-number`.
pub const RECEIVER_SETTLE_MODE_FIRST: u32 = 0;
pub const RECEIVER_SETTLE_MODE_SECOND: u32 = 1;

/// Management status code for a successful request without content.
pub const STATUS_NO_CONTENT: i64 = 204;
