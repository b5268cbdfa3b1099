//! Sender facade

use std::sync::Arc;

use busline_common::{Context, RetryOptions};
use busline_domain::{BusError, Entity, Message};
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::error::ClientResult;
use crate::links::{LinkSet, NamespaceLinks, SenderLinkCreator};

/// Sends and schedules messages on one entity.
#[derive(Debug)]
pub struct MessageSender {
    links: Arc<LinkSet>,
    retry_options: RetryOptions,
}

impl MessageSender {
    pub fn new(ns: Arc<dyn NamespaceLinks>, entity: &Entity, retry_options: RetryOptions) -> Self {
        let path = entity.path(None);
        let creator = SenderLinkCreator { target: path.clone() };
        Self { links: Arc::new(LinkSet::new(ns, path, Arc::new(creator))), retry_options }
    }

    #[must_use]
    pub fn entity_path(&self) -> &str {
        self.links.entity_path()
    }

    /// Send one message.
    ///
    /// # Errors
    /// [`BusError::MessageTooLarge`] without touching the wire when the
    /// encoded message exceeds the link's limit; otherwise the send error
    /// once retries are exhausted.
    #[instrument(skip(self, ctx, message), fields(entity = %self.links.entity_path()))]
    pub async fn send_message(&self, ctx: &Context, message: Message) -> ClientResult<()> {
        let message = &message;
        self.links
            .retry(ctx, "send_message", &self.retry_options, |links, _| async move {
                let sender = links.sender()?;
                let size = message.encoded_len();
                let max = sender.max_message_size();
                if max > 0 && size > max {
                    return Err(BusError::MessageTooLarge { size, max });
                }
                sender.send(ctx, message.clone()).await
            })
            .await
            .map_err(Into::into)
    }

    /// Schedule messages for enqueue at `enqueue_time`, returning their
    /// sequence numbers for cancellation.
    pub async fn schedule_messages(
        &self,
        ctx: &Context,
        enqueue_time: DateTime<Utc>,
        messages: Vec<Message>,
    ) -> ClientResult<Vec<i64>> {
        let messages = &messages;
        self.links
            .retry(ctx, "schedule_messages", &self.retry_options, |links, _| async move {
                links.management.schedule_messages(ctx, enqueue_time, messages.clone()).await
            })
            .await
            .map_err(Into::into)
    }

    pub async fn cancel_scheduled_messages(
        &self,
        ctx: &Context,
        sequence_numbers: &[i64],
    ) -> ClientResult<()> {
        self.links
            .retry(ctx, "cancel_scheduled_messages", &self.retry_options, |links, _| async move {
                links.management.cancel_scheduled(ctx, sequence_numbers).await
            })
            .await
            .map_err(Into::into)
    }

    /// Close permanently.
    pub async fn close(&self, ctx: &Context) -> ClientResult<()> {
        self.links.close(ctx, true).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use busline_domain::{NamespaceConfig, RecoveryKind};

    use super::*;
    use crate::links::LinkSetState;
    use crate::namespace::Namespace;
    use crate::testing::{FakeBroker, FakeConnector, FakeTokenProvider};

    fn sender(broker: &FakeBroker) -> MessageSender {
        let ns = Namespace::new(
            NamespaceConfig { host: "sb.test".into(), ..NamespaceConfig::default() },
            Arc::new(FakeConnector::new(broker.clone())),
            Arc::new(FakeTokenProvider::default()),
        );
        let retry = RetryOptions::default().delays(Duration::from_millis(1), Duration::from_millis(5));
        MessageSender::new(Arc::new(ns), &Entity::queue("orders"), retry)
    }

    /// Validates a send lands on the entity.
    ///
    /// Assertions:
    /// - Confirms the message body is queued on `orders`.
    #[tokio::test]
    async fn test_send_message() {
        let broker = FakeBroker::new();
        let sender = sender(&broker);

        sender.send_message(&Context::background(), Message::with_body(b"hi".to_vec())).await.unwrap();

        let queued = broker.active("orders");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].body_bytes(), b"hi");
    }

    /// Validates oversized messages are rejected locally.
    ///
    /// Assertions:
    /// - Confirms `MessageTooLarge` classified as fatal.
    /// - Confirms nothing was queued and the sender link stayed open.
    #[tokio::test]
    async fn test_oversized_message_rejected_before_send() {
        let broker = FakeBroker::new();
        broker.set_max_message_size(64);
        let sender = sender(&broker);

        let err = sender
            .send_message(&Context::background(), Message::with_body(vec![0u8; 1024]))
            .await
            .unwrap_err();

        assert!(matches!(err.source, BusError::MessageTooLarge { max: 64, .. }));
        assert_eq!(err.recovery, RecoveryKind::Fatal);
        assert!(broker.active("orders").is_empty());
        assert_eq!(sender.links.state().await, LinkSetState::Open);
    }

    /// Validates a transient send failure is retried transparently.
    ///
    /// Assertions:
    /// - Confirms a forced detach on the first send is recovered.
    #[tokio::test]
    async fn test_send_retries_after_detach() {
        let broker = FakeBroker::new();
        let sender = sender(&broker);
        broker.fail_next_send(BusError::detached("amqp:link:detach-forced", "moved"));

        sender.send_message(&Context::background(), Message::with_body(b"x".to_vec())).await.unwrap();
        assert_eq!(broker.active("orders").len(), 1);
    }

    /// Validates scheduling and cancellation through the sender.
    ///
    /// Assertions:
    /// - Confirms the scheduled message is stored and then removed.
    #[tokio::test]
    async fn test_schedule_and_cancel() {
        let broker = FakeBroker::new();
        let sender = sender(&broker);
        let ctx = Context::background();

        let sequence_numbers = sender
            .schedule_messages(&ctx, Utc::now(), vec![Message::with_body(b"later".to_vec())])
            .await
            .unwrap();
        assert_eq!(broker.scheduled("orders").len(), 1);

        sender.cancel_scheduled_messages(&ctx, &sequence_numbers).await.unwrap();
        assert!(broker.scheduled("orders").is_empty());
    }

    /// Validates a closed sender reports `Closed`.
    ///
    /// Assertions:
    /// - Confirms sends after close fail with the dedicated closed error.
    #[tokio::test]
    async fn test_send_after_close() {
        let broker = FakeBroker::new();
        let sender = sender(&broker);
        let ctx = Context::background();
        sender.close(&ctx).await.unwrap();

        let err = sender.send_message(&ctx, Message::default()).await.unwrap_err();
        assert!(err.is_closed());
    }
}
