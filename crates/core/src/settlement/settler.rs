//! Message settlement

use std::collections::BTreeMap;
use std::sync::Arc;

use busline_common::{Context, RetryOptions};
use busline_domain::constants::{annotations, conditions};
use busline_domain::{
    BusError, BusResult, DeadLetterOptions, Disposition, DispositionStatus, ReceivedMessage, Value,
};
use tracing::debug;
use uuid::Uuid;

use crate::links::{LinkSet, Links};
use crate::ports::{Modification, RejectError};

/// The outcome a caller asked for.
#[derive(Debug, Clone)]
enum Outcome {
    Complete,
    Abandon(BTreeMap<String, Value>),
    Defer(BTreeMap<String, Value>),
    DeadLetter(DeadLetterOptions),
}

impl Outcome {
    const fn name(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Abandon(_) => "abandon",
            Self::Defer(_) => "defer",
            Self::DeadLetter(_) => "dead_letter",
        }
    }

    fn disposition(&self, lock_token: Uuid) -> Disposition {
        match self {
            Self::Complete => Disposition::new(DispositionStatus::Completed, lock_token),
            Self::Abandon(properties) => Disposition {
                properties_to_modify: properties.clone(),
                ..Disposition::new(DispositionStatus::Abandoned, lock_token)
            },
            Self::Defer(properties) => Disposition {
                properties_to_modify: properties.clone(),
                ..Disposition::new(DispositionStatus::Deferred, lock_token)
            },
            Self::DeadLetter(options) => Disposition {
                dead_letter_reason: options.reason.clone(),
                dead_letter_description: options.description.clone(),
                properties_to_modify: options.properties_to_modify.clone(),
                ..Disposition::new(DispositionStatus::Suspended, lock_token)
            },
        }
    }
}

/// Settles received messages over the data link or the management link.
///
/// The data link is only usable while it is the very link that delivered
/// the message; otherwise the lock token travels over management.
#[derive(Debug)]
pub struct Settler {
    links: Arc<LinkSet>,
    retry_options: RetryOptions,
    management_only: bool,
}

impl Settler {
    pub fn new(links: Arc<LinkSet>, retry_options: RetryOptions) -> Self {
        Self { links, retry_options, management_only: false }
    }

    /// Always settle through the management link.
    #[must_use]
    pub fn management_only(mut self) -> Self {
        self.management_only = true;
        self
    }

    pub async fn complete(&self, ctx: &Context, message: &ReceivedMessage) -> BusResult<()> {
        self.settle(ctx, message, Outcome::Complete).await
    }

    /// Release the lock so the message can be redelivered, optionally
    /// updating its application properties.
    pub async fn abandon(
        &self,
        ctx: &Context,
        message: &ReceivedMessage,
        properties_to_modify: BTreeMap<String, Value>,
    ) -> BusResult<()> {
        self.settle(ctx, message, Outcome::Abandon(properties_to_modify)).await
    }

    /// Set the message aside; it can only be fetched again by sequence
    /// number.
    pub async fn defer(
        &self,
        ctx: &Context,
        message: &ReceivedMessage,
        properties_to_modify: BTreeMap<String, Value>,
    ) -> BusResult<()> {
        self.settle(ctx, message, Outcome::Defer(properties_to_modify)).await
    }

    pub async fn dead_letter(
        &self,
        ctx: &Context,
        message: &ReceivedMessage,
        options: DeadLetterOptions,
    ) -> BusResult<()> {
        self.settle(ctx, message, Outcome::DeadLetter(options)).await
    }

    fn use_management(&self, message: &ReceivedMessage, links: &Links) -> bool {
        self.management_only || message.deferred || message.link_id != Some(links.id)
    }

    async fn settle(&self, ctx: &Context, message: &ReceivedMessage, outcome: Outcome) -> BusResult<()> {
        let lock_token = message.lock_token.ok_or_else(|| {
            BusError::invalid_input("message has no lock token and cannot be settled")
        })?;
        let outcome = &outcome;

        self.links
            .retry(ctx, outcome.name(), &self.retry_options, |links, _| async move {
                if self.use_management(message, &links) {
                    debug!(outcome = outcome.name(), %lock_token, "Settling via management link");
                    return links.management.send_disposition(ctx, &outcome.disposition(lock_token)).await;
                }

                let receiver = links.receiver()?;
                match outcome {
                    Outcome::Complete => receiver.accept(ctx, &message.message).await,
                    Outcome::Abandon(properties) => {
                        let modification =
                            Modification { annotations: properties.clone(), ..Modification::default() };
                        receiver.modify(ctx, &message.message, modification).await
                    }
                    Outcome::Defer(properties) => {
                        let modification = Modification {
                            undeliverable_here: true,
                            annotations: properties.clone(),
                            ..Modification::default()
                        };
                        receiver.modify(ctx, &message.message, modification).await
                    }
                    Outcome::DeadLetter(options) => {
                        receiver.reject(ctx, &message.message, dead_letter_error(options)).await
                    }
                }
            })
            .await
    }
}

fn dead_letter_error(options: &DeadLetterOptions) -> RejectError {
    let mut info = options.properties_to_modify.clone();
    if let Some(reason) = &options.reason {
        info.insert(annotations::DEADLETTER_REASON.to_string(), Value::from(reason.as_str()));
    }
    if let Some(description) = &options.description {
        info.insert(
            annotations::DEADLETTER_DESCRIPTION.to_string(),
            Value::from(description.as_str()),
        );
    }
    RejectError { condition: conditions::DEAD_LETTER.to_string(), description: None, info }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use busline_domain::{Message, NamespaceConfig, ReceiveMode};

    use super::*;
    use crate::links::ReceiverLinkCreator;
    use crate::namespace::Namespace;
    use crate::testing::{FakeBroker, FakeConnector, FakeTokenProvider, SettlementPath};

    fn link_set(broker: &FakeBroker) -> Arc<LinkSet> {
        let ns = Namespace::new(
            NamespaceConfig { host: "sb.test".into(), ..NamespaceConfig::default() },
            Arc::new(FakeConnector::new(broker.clone())),
            Arc::new(FakeTokenProvider::default()),
        );
        let creator = ReceiverLinkCreator {
            source: "orders".into(),
            receive_mode: ReceiveMode::PeekLock,
            credit: 10,
        };
        Arc::new(LinkSet::new(Arc::new(ns), "orders", Arc::new(creator)))
    }

    fn retries() -> RetryOptions {
        RetryOptions::default().delays(Duration::from_millis(1), Duration::from_millis(5))
    }

    async fn receive_one(links: &LinkSet, ctx: &Context) -> ReceivedMessage {
        let current = links.get(ctx).await.unwrap();
        let receiver = current.receiver().unwrap();
        receiver.issue_credit(1).unwrap();
        let message = receiver.receive(ctx).await.unwrap();
        ReceivedMessage::from_link(message, current.id, receiver.link_name(), false)
    }

    /// Validates that a message settled on its own live link uses the data
    /// link.
    ///
    /// Assertions:
    /// - Confirms one `Completed` settlement on the data link path.
    #[tokio::test]
    async fn test_complete_uses_data_link_when_current() {
        let broker = FakeBroker::new();
        broker.enqueue("orders", Message::with_body(b"a".to_vec()));
        let links = link_set(&broker);
        let ctx = Context::background();
        let message = receive_one(&links, &ctx).await;

        Settler::new(Arc::clone(&links), retries()).complete(&ctx, &message).await.unwrap();

        let settlements = broker.settlements();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].path, SettlementPath::DataLink);
        assert_eq!(settlements[0].status, DispositionStatus::Completed);
        assert_eq!(Some(settlements[0].lock_token), message.lock_token);
    }

    /// Validates the management path is chosen when the delivering link is
    /// gone, the message was deferred, or the settler is management-only.
    ///
    /// Assertions:
    /// - Confirms a message from a replaced link settles via management.
    /// - Confirms a deferred message settles via management.
    /// - Confirms a management-only settler never touches the data link.
    #[tokio::test]
    async fn test_management_path_selection() {
        let broker = FakeBroker::new();
        for body in [b"a", b"b"] {
            broker.enqueue("orders", Message::with_body(body.to_vec()));
        }
        let links = link_set(&broker);
        let ctx = Context::background();
        let settler = Settler::new(Arc::clone(&links), retries());

        let stale = receive_one(&links, &ctx).await;
        links.close(&ctx, false).await.unwrap();
        settler.complete(&ctx, &stale).await.unwrap();

        let mut deferred = receive_one(&links, &ctx).await;
        deferred.deferred = true;
        settler.abandon(&ctx, &deferred, BTreeMap::new()).await.unwrap();

        let fresh = ReceivedMessage { deferred: false, ..deferred.clone() };
        Settler::new(Arc::clone(&links), retries())
            .management_only()
            .complete(&ctx, &fresh)
            .await
            .unwrap();

        let paths: Vec<SettlementPath> = broker.settlements().iter().map(|s| s.path).collect();
        assert_eq!(paths, vec![SettlementPath::Management; 3]);
    }

    /// Validates dead-lettering on the data link.
    ///
    /// Assertions:
    /// - Confirms a `Suspended` settlement carrying the reason.
    /// - Confirms the message lands in the dead-letter sub-queue.
    #[tokio::test]
    async fn test_dead_letter_on_data_link() {
        let broker = FakeBroker::new();
        broker.enqueue("orders", Message::with_body(b"poison".to_vec()));
        let links = link_set(&broker);
        let ctx = Context::background();
        let message = receive_one(&links, &ctx).await;

        let options = DeadLetterOptions { reason: Some("bad payload".into()), ..DeadLetterOptions::default() };
        Settler::new(Arc::clone(&links), retries()).dead_letter(&ctx, &message, options).await.unwrap();

        let settlement = broker.settlements().pop().unwrap();
        assert_eq!(settlement.status, DispositionStatus::Suspended);
        assert_eq!(settlement.dead_letter_reason.as_deref(), Some("bad payload"));
        assert_eq!(broker.active("orders/$DeadLetterQueue").len(), 1);
    }

    /// Validates a message without a lock token is rejected up front.
    ///
    /// Assertions:
    /// - Ensures `InvalidInput` and no settlement recorded.
    #[tokio::test]
    async fn test_missing_lock_token_is_invalid() {
        let broker = FakeBroker::new();
        broker.enqueue("orders", Message::with_body(b"a".to_vec()));
        let links = link_set(&broker);
        let ctx = Context::background();
        let mut message = receive_one(&links, &ctx).await;
        message.lock_token = None;

        let result = Settler::new(links, retries()).complete(&ctx, &message).await;
        assert!(matches!(result, Err(BusError::InvalidInput(_))));
        assert!(broker.settlements().is_empty());
    }

    /// Validates a link failure during settlement recovers and retries over
    /// management.
    ///
    /// Assertions:
    /// - Confirms the settlement succeeds after one injected detach.
    /// - Confirms the retry went through the management link under a new
    ///   link revision.
    #[tokio::test]
    async fn test_settlement_retries_after_link_failure() {
        let broker = FakeBroker::new();
        broker.enqueue("orders", Message::with_body(b"a".to_vec()));
        let links = link_set(&broker);
        let ctx = Context::background();
        let message = receive_one(&links, &ctx).await;

        broker.fail_next_settlement(BusError::detached(conditions::DETACH_FORCED, "moved"));
        Settler::new(Arc::clone(&links), retries()).complete(&ctx, &message).await.unwrap();

        let settlements = broker.settlements();
        assert_eq!(settlements.len(), 1);
        assert_eq!(settlements[0].path, SettlementPath::Management);
        assert_eq!(links.current_id().await.map(|id| id.link), Some(2));
    }
}
