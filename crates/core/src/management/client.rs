//! Management operations over the RPC link
//!
//! Each operation is one request message whose
//! `application-properties["operation"]` names the operation and whose body
//! is a map of operation-specific fields.

use std::collections::BTreeMap;
use std::sync::Arc;

use busline_common::Context;
use busline_domain::constants::{
    annotations, fields, operations, properties, RECEIVER_SETTLE_MODE_FIRST,
    RECEIVER_SETTLE_MODE_SECOND, STATUS_NO_CONTENT,
};
use busline_domain::{
    BusError, BusResult, Disposition, MapExt, Message, ReceiveMode, ReceivedMessage, Value,
};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::rpc::{RpcLink, RpcResponse};
use crate::ports::Session;

/// Client for the `$management` node of one entity.
#[derive(Debug)]
pub struct ManagementClient {
    link: RpcLink,
}

impl ManagementClient {
    /// Attach the management link pair for `address` over `session`.
    ///
    /// # Errors
    /// Returns the attach error.
    pub async fn open(ctx: &Context, session: &Arc<dyn Session>, address: &str) -> BusResult<Self> {
        Ok(Self { link: RpcLink::open(ctx, session, address).await? })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        self.link.address()
    }

    pub async fn close(&self, ctx: &Context) -> BusResult<()> {
        self.link.close(ctx).await
    }

    async fn call(
        &self,
        ctx: &Context,
        operation: &str,
        extra_properties: Vec<(&str, Value)>,
        body: BTreeMap<String, Value>,
    ) -> BusResult<RpcResponse> {
        let mut application_properties = BTreeMap::new();
        application_properties.insert(properties::OPERATION.to_string(), Value::from(operation));
        for (key, value) in extra_properties {
            application_properties.insert(key.to_string(), value);
        }

        debug!(operation, address = %self.address(), "Management request");
        self.link.rpc(ctx, Message::request(application_properties, Value::Map(body))).await
    }

    /// Settle a message by lock token.
    pub async fn send_disposition(&self, ctx: &Context, disposition: &Disposition) -> BusResult<()> {
        let mut body = BTreeMap::new();
        body.insert(
            fields::DISPOSITION_STATUS.to_string(),
            Value::from(disposition.status.as_wire_str()),
        );
        body.insert(
            fields::LOCK_TOKENS.to_string(),
            Value::List(vec![Value::Uuid(disposition.lock_token)]),
        );
        if let Some(reason) = &disposition.dead_letter_reason {
            body.insert(fields::DEADLETTER_REASON.to_string(), Value::from(reason.as_str()));
        }
        if let Some(description) = &disposition.dead_letter_description {
            body.insert(
                fields::DEADLETTER_DESCRIPTION.to_string(),
                Value::from(description.as_str()),
            );
        }
        if !disposition.properties_to_modify.is_empty() {
            body.insert(
                fields::PROPERTIES_TO_MODIFY.to_string(),
                Value::Map(disposition.properties_to_modify.clone()),
            );
        }

        self.call(ctx, operations::UPDATE_DISPOSITION, vec![], body).await.map(|_| ())
    }

    /// Renew message locks, returning the new expiry per token.
    pub async fn renew_locks(
        &self,
        ctx: &Context,
        link_name: Option<&str>,
        lock_tokens: &[Uuid],
    ) -> BusResult<Vec<DateTime<Utc>>> {
        let mut body = BTreeMap::new();
        body.insert(
            fields::LOCK_TOKENS.to_string(),
            Value::List(lock_tokens.iter().copied().map(Value::Uuid).collect()),
        );
        let extra = link_name
            .filter(|name| !name.is_empty())
            .map(|name| vec![(properties::ASSOCIATED_LINK_NAME, Value::from(name))])
            .unwrap_or_default();

        let response = self.call(ctx, operations::RENEW_LOCK, extra, body).await?;
        response_map(&response)?
            .required_list(fields::EXPIRATIONS)?
            .iter()
            .map(|v| v.as_timestamp().ok_or_else(|| BusError::malformed(fields::EXPIRATIONS, "expected timestamps")))
            .collect()
    }

    /// Renew a session lock, returning the new expiry.
    pub async fn renew_session_lock(&self, ctx: &Context, session_id: &str) -> BusResult<DateTime<Utc>> {
        let body = session_body(session_id);
        let response = self.call(ctx, operations::RENEW_SESSION_LOCK, vec![], body).await?;
        response_map(&response)?.required_timestamp(fields::EXPIRATION)
    }

    /// Peek up to `count` messages starting at `from_sequence_number`
    /// without locking them.
    pub async fn peek_messages(
        &self,
        ctx: &Context,
        from_sequence_number: i64,
        count: u32,
    ) -> BusResult<Vec<Message>> {
        let mut body = BTreeMap::new();
        body.insert(fields::FROM_SEQUENCE_NUMBER.to_string(), Value::Int(from_sequence_number));
        body.insert(fields::MESSAGE_COUNT.to_string(), Value::from(count));

        let response = self.call(ctx, operations::PEEK_MESSAGE, vec![], body).await?;
        if response.code == STATUS_NO_CONTENT {
            return Ok(Vec::new());
        }
        decode_entries(&response)?.into_iter().map(|(message, _)| Ok(message)).collect()
    }

    /// Receive deferred messages by sequence number.
    pub async fn receive_deferred(
        &self,
        ctx: &Context,
        mode: ReceiveMode,
        sequence_numbers: &[i64],
    ) -> BusResult<Vec<ReceivedMessage>> {
        let settle_mode = match mode {
            ReceiveMode::PeekLock => RECEIVER_SETTLE_MODE_SECOND,
            ReceiveMode::ReceiveAndDelete => RECEIVER_SETTLE_MODE_FIRST,
        };
        let mut body = BTreeMap::new();
        body.insert(fields::SEQUENCE_NUMBERS.to_string(), int_list(sequence_numbers));
        body.insert(fields::RECEIVER_SETTLE_MODE.to_string(), Value::from(settle_mode));

        let response =
            self.call(ctx, operations::RECEIVE_BY_SEQUENCE_NUMBER, vec![], body).await?;
        if response.code == STATUS_NO_CONTENT {
            return Ok(Vec::new());
        }

        Ok(decode_entries(&response)?
            .into_iter()
            .map(|(message, lock_token)| {
                let lock_token = match mode {
                    ReceiveMode::PeekLock => lock_token,
                    ReceiveMode::ReceiveAndDelete => None,
                };
                ReceivedMessage::from_management(message, lock_token, true)
            })
            .collect())
    }

    /// Schedule messages for enqueue at `enqueue_time`, returning their
    /// sequence numbers.
    pub async fn schedule_messages(
        &self,
        ctx: &Context,
        enqueue_time: DateTime<Utc>,
        messages: Vec<Message>,
    ) -> BusResult<Vec<i64>> {
        if messages.is_empty() {
            return Err(BusError::invalid_input("expected one or more messages"));
        }

        let mut entries = Vec::with_capacity(messages.len());
        for mut message in messages {
            message
                .annotations
                .insert(annotations::SCHEDULED_ENQUEUE_TIME.to_string(), Value::from(enqueue_time));
            let message_id = message
                .properties
                .message_id
                .get_or_insert_with(|| Uuid::new_v4().to_string())
                .clone();

            let mut entry = BTreeMap::new();
            entry.insert(fields::MESSAGE_ID.to_string(), Value::from(message_id));
            entry.insert(fields::MESSAGE.to_string(), Value::Binary(message.encode()?));
            if let Some(session_id) = message.session_id().filter(|s| !s.is_empty()) {
                entry.insert(fields::SESSION_ID.to_string(), Value::from(session_id));
            }
            if let Some(key) = message.annotations.get(annotations::PARTITION_KEY) {
                entry.insert(fields::PARTITION_KEY.to_string(), key.clone());
            }
            if let Some(key) = message.annotations.get(annotations::VIA_PARTITION_KEY) {
                entry.insert(fields::VIA_PARTITION_KEY.to_string(), key.clone());
            }
            entries.push(Value::Map(entry));
        }

        let mut body = BTreeMap::new();
        body.insert(fields::MESSAGES.to_string(), Value::List(entries));

        let response = self.call(ctx, operations::SCHEDULE_MESSAGE, vec![], body).await?;
        response_map(&response)?
            .required_list(fields::SEQUENCE_NUMBERS)?
            .iter()
            .map(|v| v.as_i64().ok_or_else(|| BusError::malformed(fields::SEQUENCE_NUMBERS, "expected integers")))
            .collect()
    }

    /// Cancel scheduled messages by sequence number.
    pub async fn cancel_scheduled(&self, ctx: &Context, sequence_numbers: &[i64]) -> BusResult<()> {
        let mut body = BTreeMap::new();
        body.insert(fields::SEQUENCE_NUMBERS.to_string(), int_list(sequence_numbers));
        self.call(ctx, operations::CANCEL_SCHEDULED_MESSAGE, vec![], body).await.map(|_| ())
    }

    /// Read the opaque state of a session; `None` when unset.
    pub async fn get_session_state(&self, ctx: &Context, session_id: &str) -> BusResult<Option<Vec<u8>>> {
        let response =
            self.call(ctx, operations::GET_SESSION_STATE, vec![], session_body(session_id)).await?;
        match response_map(&response)?.get(fields::SESSION_STATE) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Binary(state)) => Ok(Some(state.clone())),
            Some(_) => Err(BusError::malformed(fields::SESSION_STATE, "expected binary data")),
        }
    }

    /// Replace the opaque state of a session; `None` clears it.
    pub async fn set_session_state(
        &self,
        ctx: &Context,
        session_id: &str,
        state: Option<Vec<u8>>,
    ) -> BusResult<()> {
        let mut body = session_body(session_id);
        body.insert(fields::SESSION_STATE.to_string(), state.map_or(Value::Null, Value::Binary));
        let tracking = vec![(properties::TRACKING_ID, Value::from(Uuid::new_v4().to_string()))];
        self.call(ctx, operations::SET_SESSION_STATE, tracking, body).await.map(|_| ())
    }
}

fn session_body(session_id: &str) -> BTreeMap<String, Value> {
    let mut body = BTreeMap::new();
    body.insert(fields::SESSION_ID.to_string(), Value::from(session_id));
    body
}

fn int_list(values: &[i64]) -> Value {
    Value::List(values.iter().copied().map(Value::Int).collect())
}

fn response_map(response: &RpcResponse) -> BusResult<&BTreeMap<String, Value>> {
    response
        .message
        .body
        .as_map()
        .ok_or_else(|| BusError::malformed("body", "expected a map"))
}

/// Decode the `messages` list of a peek or receive-by-sequence response.
fn decode_entries(response: &RpcResponse) -> BusResult<Vec<(Message, Option<Uuid>)>> {
    response_map(response)?
        .required_list(fields::MESSAGES)?
        .iter()
        .map(|entry| {
            let entry = entry
                .as_map()
                .ok_or_else(|| BusError::malformed(fields::MESSAGES, "expected a list of maps"))?;
            let message = Message::decode(entry.required_binary(fields::MESSAGE)?)?;
            let lock_token = entry.get(fields::LOCK_TOKEN).and_then(Value::as_uuid);
            Ok((message, lock_token))
        })
        .collect()
}
