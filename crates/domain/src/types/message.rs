//! Message model

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::recovery::LinkId;
use super::value::Value;
use crate::constants::annotations;
use crate::errors::BusResult;

/// Standard AMQP message properties used by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    /// AMQP `group-id`; the broker's session id.
    pub group_id: Option<String>,
    pub reply_to: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub content_type: Option<String>,
}

/// An AMQP message as seen by the links.
///
/// Encoded as JSON when embedded in management bodies; the AMQP frame codec
/// itself belongs to the substrate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub properties: MessageProperties,
    #[serde(default)]
    pub application_properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
    #[serde(default)]
    pub body: Value,
    /// Delivery tag assigned by the receiving link; the lock token for
    /// peek-lock deliveries.
    #[serde(skip)]
    pub delivery_tag: Option<Uuid>,
}

impl Message {
    /// A message carrying `data` as its binary body.
    pub fn with_body(data: impl Into<Vec<u8>>) -> Self {
        Self { body: Value::Binary(data.into()), ..Self::default() }
    }

    /// Request-style message: `body` plus application properties.
    #[must_use]
    pub fn request(application_properties: BTreeMap<String, Value>, body: Value) -> Self {
        Self { application_properties, body, ..Self::default() }
    }

    /// Binary body bytes, or empty for non-binary bodies.
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_binary().unwrap_or_default()
    }

    /// Approximate encoded size used for the max-message-size check.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len() as u64)
    }

    pub fn encode(&self) -> BusResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> BusResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    #[must_use]
    pub fn sequence_number(&self) -> Option<i64> {
        self.annotations.get(annotations::SEQUENCE_NUMBER).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        self.annotations.get(annotations::LOCKED_UNTIL).and_then(Value::as_timestamp)
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.properties.group_id.as_deref()
    }
}

/// A message delivered to the caller, correlated with the link that
/// delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message: Message,
    /// Lock token; `None` for peeked and receive-and-delete messages.
    pub lock_token: Option<Uuid>,
    pub sequence_number: Option<i64>,
    pub locked_until: Option<DateTime<Utc>>,
    /// Link revision at receive time. `None` when the message did not arrive
    /// on a data link (peeked or deferred).
    pub link_id: Option<LinkId>,
    /// Received through `receive-by-sequence-number`; settles only via the
    /// management link.
    pub deferred: bool,
    /// Name of the receiving link, used as `associated-link-name`.
    pub link_name: Option<String>,
}

impl ReceivedMessage {
    /// A message delivered on a data link with the given revision.
    #[must_use]
    pub fn from_link(message: Message, link_id: LinkId, link_name: &str, settled: bool) -> Self {
        let lock_token = if settled { None } else { message.delivery_tag };
        Self {
            lock_token,
            sequence_number: message.sequence_number(),
            locked_until: message.locked_until(),
            link_id: Some(link_id),
            deferred: false,
            link_name: Some(link_name.to_string()),
            message,
        }
    }

    /// A message returned by the management link.
    #[must_use]
    pub fn from_management(message: Message, lock_token: Option<Uuid>, deferred: bool) -> Self {
        Self {
            lock_token,
            sequence_number: message.sequence_number(),
            locked_until: message.locked_until(),
            link_id: None,
            deferred,
            link_name: None,
            message,
        }
    }
}
