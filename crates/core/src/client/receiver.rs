//! Receiver facade

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use busline_common::{Context, RetryOptions};
use busline_domain::{
    BusError, DeadLetterOptions, Entity, ReceiveMode, ReceivedMessage, ReceiverConfig, Value,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::error::ClientResult;
use crate::links::{LinkSet, NamespaceLinks, ReceiverLinkCreator};
use crate::receive::BatchReceiver;
use crate::settlement::Settler;

/// Receives, settles and inspects messages of one entity.
#[derive(Debug)]
pub struct MessageReceiver {
    links: Arc<LinkSet>,
    batch: BatchReceiver,
    /// `None` in receive-and-delete mode.
    settler: Option<Settler>,
    config: ReceiverConfig,
    retry_options: RetryOptions,
    /// Sequence number the next cursor-based peek starts from.
    next_peek: Mutex<i64>,
}

impl MessageReceiver {
    pub fn new(
        ns: Arc<dyn NamespaceLinks>,
        entity: &Entity,
        config: ReceiverConfig,
        retry_options: RetryOptions,
    ) -> Self {
        let path = entity.path(config.sub_queue);
        let creator = ReceiverLinkCreator {
            source: path.clone(),
            receive_mode: config.receive_mode,
            credit: config.prefetch_credit,
        };
        let links = Arc::new(LinkSet::new(ns, path, Arc::new(creator)));
        let settler = match config.receive_mode {
            ReceiveMode::PeekLock => Some(Settler::new(Arc::clone(&links), retry_options.clone())),
            ReceiveMode::ReceiveAndDelete => None,
        };

        Self {
            batch: BatchReceiver::new(Arc::clone(&links), &config),
            links,
            settler,
            config,
            retry_options,
            next_peek: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn entity_path(&self) -> &str {
        self.links.entity_path()
    }

    #[must_use]
    pub fn receive_mode(&self) -> ReceiveMode {
        self.config.receive_mode
    }

    /// Receive up to `max_messages`, waiting at most `max_wait` for the
    /// first one.
    pub async fn receive_messages(
        &self,
        ctx: &Context,
        max_messages: u32,
        max_wait: Duration,
    ) -> ClientResult<Vec<ReceivedMessage>> {
        let after_first = self.config.effective_max_wait_after_first();
        self.batch.receive(ctx, max_messages, max_wait, after_first).await.map_err(Into::into)
    }

    fn settler(&self) -> ClientResult<&Settler> {
        self.settler.as_ref().ok_or_else(|| {
            BusError::invalid_input("messages received in receive-and-delete mode cannot be settled")
                .into()
        })
    }

    pub async fn complete_message(&self, ctx: &Context, message: &ReceivedMessage) -> ClientResult<()> {
        self.settler()?.complete(ctx, message).await.map_err(Into::into)
    }

    pub async fn abandon_message(
        &self,
        ctx: &Context,
        message: &ReceivedMessage,
        properties_to_modify: BTreeMap<String, Value>,
    ) -> ClientResult<()> {
        self.settler()?.abandon(ctx, message, properties_to_modify).await.map_err(Into::into)
    }

    pub async fn defer_message(
        &self,
        ctx: &Context,
        message: &ReceivedMessage,
        properties_to_modify: BTreeMap<String, Value>,
    ) -> ClientResult<()> {
        self.settler()?.defer(ctx, message, properties_to_modify).await.map_err(Into::into)
    }

    pub async fn dead_letter_message(
        &self,
        ctx: &Context,
        message: &ReceivedMessage,
        options: DeadLetterOptions,
    ) -> ClientResult<()> {
        self.settler()?.dead_letter(ctx, message, options).await.map_err(Into::into)
    }

    /// Peek up to `max_messages` without locking them.
    ///
    /// Starts at `from_sequence_number` when given, otherwise right after
    /// the last message this receiver peeked.
    pub async fn peek_messages(
        &self,
        ctx: &Context,
        max_messages: u32,
        from_sequence_number: Option<i64>,
    ) -> ClientResult<Vec<ReceivedMessage>> {
        if let Some(from) = from_sequence_number {
            *self.next_peek.lock() = from;
        }
        let from = *self.next_peek.lock();

        let messages = self
            .links
            .retry(ctx, "peek_messages", &self.retry_options, |links, _| async move {
                links.management.peek_messages(ctx, from, max_messages).await
            })
            .await?;

        if let Some(last) = messages.last().and_then(|m| m.sequence_number()) {
            *self.next_peek.lock() = last + 1;
        }
        debug!(from, count = messages.len(), "Peeked messages");
        Ok(messages
            .into_iter()
            .map(|message| ReceivedMessage::from_management(message, None, false))
            .collect())
    }

    /// Fetch deferred messages by sequence number. They can only be settled
    /// through the management link.
    pub async fn receive_deferred_messages(
        &self,
        ctx: &Context,
        sequence_numbers: &[i64],
    ) -> ClientResult<Vec<ReceivedMessage>> {
        let mode = self.config.receive_mode;
        self.links
            .retry(ctx, "receive_deferred_messages", &self.retry_options, |links, _| async move {
                links.management.receive_deferred(ctx, mode, sequence_numbers).await
            })
            .await
            .map_err(Into::into)
    }

    /// Extend the lock of `message`, updating its `locked_until`.
    pub async fn renew_message_lock(
        &self,
        ctx: &Context,
        message: &mut ReceivedMessage,
    ) -> ClientResult<()> {
        let lock_token = message
            .lock_token
            .ok_or_else(|| BusError::invalid_input("message has no lock token to renew"))?;
        let link_name = message.link_name.as_deref();

        let expirations = self
            .links
            .retry(ctx, "renew_message_lock", &self.retry_options, |links, _| async move {
                links.management.renew_locks(ctx, link_name, &[lock_token]).await
            })
            .await?;

        let locked_until = expirations
            .first()
            .copied()
            .ok_or_else(|| BusError::malformed("expirations", "empty list"))?;
        message.locked_until = Some(locked_until);
        Ok(())
    }

    pub async fn renew_session_lock(&self, ctx: &Context, session_id: &str) -> ClientResult<DateTime<Utc>> {
        self.links
            .retry(ctx, "renew_session_lock", &self.retry_options, |links, _| async move {
                links.management.renew_session_lock(ctx, session_id).await
            })
            .await
            .map_err(Into::into)
    }

    pub async fn get_session_state(&self, ctx: &Context, session_id: &str) -> ClientResult<Option<Vec<u8>>> {
        self.links
            .retry(ctx, "get_session_state", &self.retry_options, |links, _| async move {
                links.management.get_session_state(ctx, session_id).await
            })
            .await
            .map_err(Into::into)
    }

    pub async fn set_session_state(
        &self,
        ctx: &Context,
        session_id: &str,
        state: Option<Vec<u8>>,
    ) -> ClientResult<()> {
        let state = &state;
        self.links
            .retry(ctx, "set_session_state", &self.retry_options, |links, _| async move {
                links.management.set_session_state(ctx, session_id, state.clone()).await
            })
            .await
            .map_err(Into::into)
    }

    /// Close permanently.
    pub async fn close(&self, ctx: &Context) -> ClientResult<()> {
        self.links.close(ctx, true).await.map_err(Into::into)
    }
}
