//! Revisioned link set
//!
//! A [`LinkSet`] owns the session, data links, management client and claim
//! renewals of one entity. Links are created lazily on first use and
//! replaced as a unit on recovery. Every successful creation bumps the link
//! revision; callers report the [`LinkId`] they observed together with the
//! error, and a recovery whose revision no longer matches is skipped. Two
//! callers failing on the same links therefore trigger one rebuild.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use busline_common::{Context, RetryFnArgs, RetryOptions};
use busline_domain::constants::MANAGEMENT_SUFFIX;
use busline_domain::{BusError, BusResult, LinkId, ReceiveMode, RecoveryKind};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::ports::{DataLinks, LinkCreator, NamespaceLinks};
use crate::management::ManagementClient;
use crate::namespace::ClaimRenewal;
use crate::ports::{Receivable, ReceiverOptions, Sendable, SenderOptions, Session};
use crate::recovery::{classify, is_fatal};

/// Lifecycle of a link set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSetState {
    /// No links created yet.
    Uninitialized,
    /// Links are live.
    Open,
    /// Links were closed and will be recreated on next use.
    Closed,
    /// Closed for good; every operation fails with [`BusError::Closed`].
    ClosedPermanently,
}

/// A consistent snapshot of the live links.
#[derive(Clone)]
pub struct Links {
    pub id: LinkId,
    pub sender: Option<Arc<dyn Sendable>>,
    pub receiver: Option<Arc<dyn Receivable>>,
    pub management: Arc<ManagementClient>,
}

impl std::fmt::Debug for Links {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Links")
            .field("id", &self.id)
            .field("sender", &self.sender.as_ref().map(|s| s.link_name().to_string()))
            .field("receiver", &self.receiver.as_ref().map(|r| r.link_name().to_string()))
            .finish_non_exhaustive()
    }
}

impl Links {
    /// The data sender.
    ///
    /// # Errors
    /// [`BusError::InvalidInput`] when the set was built without one.
    pub fn sender(&self) -> BusResult<&Arc<dyn Sendable>> {
        self.sender.as_ref().ok_or_else(|| BusError::invalid_input("link set has no sender"))
    }

    /// The data receiver.
    ///
    /// # Errors
    /// [`BusError::InvalidInput`] when the set was built without one.
    pub fn receiver(&self) -> BusResult<&Arc<dyn Receivable>> {
        self.receiver.as_ref().ok_or_else(|| BusError::invalid_input("link set has no receiver"))
    }
}

#[derive(Default)]
struct LinkState {
    revision: u64,
    connection_revision: u64,
    closed_permanently: bool,
    session: Option<Arc<dyn Session>>,
    sender: Option<Arc<dyn Sendable>>,
    receiver: Option<Arc<dyn Receivable>>,
    management: Option<Arc<ManagementClient>>,
    data_claim: Option<ClaimRenewal>,
    management_claim: Option<ClaimRenewal>,
}

impl LinkState {
    fn id(&self) -> LinkId {
        LinkId { connection: self.connection_revision, link: self.revision }
    }

    fn links(&self) -> Option<Links> {
        let management = self.management.as_ref()?;
        if self.sender.is_none() && self.receiver.is_none() {
            return None;
        }
        Some(Links {
            id: self.id(),
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            management: Arc::clone(management),
        })
    }
}

/// Session, links and claims for one entity.
pub struct LinkSet {
    ns: Arc<dyn NamespaceLinks>,
    entity_path: String,
    management_path: String,
    creator: Arc<dyn LinkCreator>,
    state: RwLock<LinkState>,
}

impl std::fmt::Debug for LinkSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSet").field("entity_path", &self.entity_path).finish_non_exhaustive()
    }
}

impl LinkSet {
    pub fn new(
        ns: Arc<dyn NamespaceLinks>,
        entity_path: impl Into<String>,
        creator: Arc<dyn LinkCreator>,
    ) -> Self {
        let entity_path = entity_path.into();
        let management_path = format!("{entity_path}/{MANAGEMENT_SUFFIX}");
        Self { ns, entity_path, management_path, creator, state: RwLock::default() }
    }

    #[must_use]
    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    #[must_use]
    pub fn management_path(&self) -> &str {
        &self.management_path
    }

    pub async fn state(&self) -> LinkSetState {
        let state = self.state.read().await;
        if state.closed_permanently {
            LinkSetState::ClosedPermanently
        } else if state.links().is_some() {
            LinkSetState::Open
        } else if state.revision == 0 {
            LinkSetState::Uninitialized
        } else {
            LinkSetState::Closed
        }
    }

    /// Id of the live links, if any.
    pub async fn current_id(&self) -> Option<LinkId> {
        self.state.read().await.links().map(|links| links.id)
    }

    /// The live links, creating them if needed.
    ///
    /// # Errors
    /// [`BusError::Closed`] after a permanent close, otherwise the creation
    /// error.
    pub async fn get(&self, ctx: &Context) -> BusResult<Links> {
        {
            let state = self.state.read().await;
            if state.closed_permanently {
                return Err(BusError::Closed);
            }
            if let Some(links) = state.links() {
                return Ok(links);
            }
        }

        let mut state = self.state.write().await;
        if state.closed_permanently {
            return Err(BusError::Closed);
        }
        if let Some(links) = state.links() {
            return Ok(links);
        }
        self.init_locked(ctx, &mut state).await
    }

    /// Run `operation` against the live links under the retry policy,
    /// recovering between attempts as the previous error requires.
    ///
    /// # Errors
    /// The fatal error, the last error when retries run out, or a recovery
    /// error that is itself fatal.
    pub async fn retry<T, F, Fut>(
        &self,
        ctx: &Context,
        name: &str,
        options: &RetryOptions,
        operation: F,
    ) -> BusResult<T>
    where
        F: Fn(Links, RetryFnArgs<BusError>) -> Fut,
        Fut: Future<Output = BusResult<T>>,
    {
        let last_id: Mutex<Option<LinkId>> = Mutex::new(None);
        let last_id = &last_id;
        let operation = &operation;

        busline_common::retry(ctx, name, options, is_fatal, |args: RetryFnArgs<BusError>| async move {
            if let Some(err) = &args.last_err {
                let observed = *last_id.lock();
                if let Some(observed) = observed {
                    self.recover_if_needed(ctx, observed, err).await?;
                }
            }

            // A failed `get` still needs an id so the next attempt can
            // recover the connection it failed on.
            let pending = self.pending_id().await;
            let links = match self.get(ctx).await {
                Ok(links) => links,
                Err(err) => {
                    *last_id.lock() = Some(pending);
                    return Err(err);
                }
            };
            *last_id.lock() = Some(links.id);
            operation(links, args).await
        })
        .await
    }

    /// Rebuild whatever `err` says is broken, unless the links observed as
    /// `observed` were already replaced.
    ///
    /// # Errors
    /// [`BusError::Closed`] once closed permanently. Fatal errors are
    /// returned unchanged (after closing permanently unless they are
    /// cancellations); rebuild failures are returned as-is.
    #[instrument(skip(self, ctx, err), fields(entity = %self.entity_path, observed = %observed))]
    pub async fn recover_if_needed(
        &self,
        ctx: &Context,
        observed: LinkId,
        err: &BusError,
    ) -> BusResult<()> {
        if self.state.read().await.closed_permanently {
            return Err(BusError::Closed);
        }

        let kind = classify(err);
        match kind {
            RecoveryKind::None => Ok(()),
            RecoveryKind::Fatal => {
                if !err.is_cancellation() {
                    warn!(error = %err, "Fatal error, closing links permanently");
                    if let Err(close_err) = self.close(ctx, true).await {
                        debug!(error = %close_err, "Error closing links after fatal error");
                    }
                }
                Err(err.clone())
            }
            RecoveryKind::Link | RecoveryKind::Connection => {
                let mut state = self.state.write().await;
                if state.closed_permanently {
                    return Err(BusError::Closed);
                }
                if state.revision != observed.link {
                    debug!(current = state.revision, "Links already recovered");
                    return Ok(());
                }

                info!(kind = %kind, error = %err, "Recovering links");
                if let Err(close_err) = self.close_locked(ctx, &mut state, false).await {
                    debug!(error = %close_err, "Error closing links during recovery");
                }
                if kind == RecoveryKind::Connection {
                    self.ns.recover_connection(ctx, observed.connection).await?;
                }
                self.init_locked(ctx, &mut state).await.map(|_| ())
            }
        }
    }

    /// Close whatever `err` says is broken without rebuilding, returning
    /// the classification. Cancellation closes nothing.
    pub async fn close_if_needed(&self, ctx: &Context, err: &BusError) -> RecoveryKind {
        if err.is_cancellation() {
            return RecoveryKind::None;
        }

        let kind = classify(err);
        match kind {
            RecoveryKind::None => {}
            RecoveryKind::Link => {
                if let Err(close_err) = self.close(ctx, false).await {
                    debug!(error = %close_err, "Error closing links");
                }
            }
            RecoveryKind::Connection | RecoveryKind::Fatal => {
                if let Err(close_err) = self.close(ctx, false).await {
                    debug!(error = %close_err, "Error closing links");
                }
                if let Err(close_err) = self.ns.close(false).await {
                    debug!(error = %close_err, "Error closing connection");
                }
            }
        }
        kind
    }

    /// Close the links. A permanent close makes every later call fail with
    /// [`BusError::Closed`]; closing again is a no-op.
    ///
    /// # Errors
    /// The aggregated link close errors.
    pub async fn close(&self, ctx: &Context, permanent: bool) -> BusResult<()> {
        let mut state = self.state.write().await;
        self.close_locked(ctx, &mut state, permanent).await
    }

    async fn close_locked(
        &self,
        ctx: &Context,
        state: &mut LinkState,
        permanent: bool,
    ) -> BusResult<()> {
        if permanent {
            state.closed_permanently = true;
        }

        for claim in [state.data_claim.take(), state.management_claim.take()].into_iter().flatten() {
            claim.stop().await;
        }

        let mut errors = Vec::new();
        if let Some(sender) = state.sender.take() {
            if let Err(err) = sender.close(ctx).await {
                errors.push(err);
            }
        }
        if let Some(receiver) = state.receiver.take() {
            if let Err(err) = receiver.close(ctx).await {
                errors.push(err);
            }
        }
        if let Some(management) = state.management.take() {
            if let Err(err) = management.close(ctx).await {
                errors.push(err);
            }
        }
        if let Some(session) = state.session.take() {
            if let Err(err) = session.close(ctx).await {
                errors.push(err);
            }
        }

        debug!(entity = %self.entity_path, permanent, revision = state.revision, "Links closed");
        BusError::join(errors)
    }

    /// Id of whatever `get` is about to use: the live links, or the current
    /// link revision on the namespace's current connection.
    async fn pending_id(&self) -> LinkId {
        if let Some(id) = self.current_id().await {
            return id;
        }
        let link = self.state.read().await.revision;
        LinkId { connection: self.ns.connection_revision().await, link }
    }

    async fn init_locked(&self, ctx: &Context, state: &mut LinkState) -> BusResult<Links> {
        if let Err(err) = self.attach_locked(ctx, state).await {
            warn!(entity = %self.entity_path, error = %err, "Failed to create links");
            if let Err(close_err) = self.close_locked(ctx, state, false).await {
                debug!(error = %close_err, "Error closing partially created links");
            }
            return Err(err);
        }

        state.revision += 1;
        info!(entity = %self.entity_path, id = %state.id(), "Links created");
        state.links().ok_or(BusError::LinkClosed)
    }

    async fn attach_locked(&self, ctx: &Context, state: &mut LinkState) -> BusResult<()> {
        state.data_claim = Some(self.ns.negotiate_claim(ctx, &self.entity_path).await?);
        state.management_claim = Some(self.ns.negotiate_claim(ctx, &self.management_path).await?);

        let (session, connection_revision) = self.ns.new_session(ctx).await?;
        state.session = Some(Arc::clone(&session));
        state.connection_revision = connection_revision;

        let DataLinks { sender, receiver } = self.creator.create_links(ctx, &session).await?;
        if sender.is_none() && receiver.is_none() {
            return Err(BusError::invalid_input("link creator returned no links"));
        }
        state.sender = sender;
        state.receiver = receiver;

        state.management =
            Some(self.ns.new_management_client(ctx, &session, &self.management_path).await?);
        Ok(())
    }
}

/// Creates a single data sender.
#[derive(Debug, Clone)]
pub struct SenderLinkCreator {
    pub target: String,
}

#[async_trait]
impl LinkCreator for SenderLinkCreator {
    async fn create_links(&self, ctx: &Context, session: &Arc<dyn Session>) -> BusResult<DataLinks> {
        let sender = session.new_sender(ctx, SenderOptions { target: self.target.clone() }).await?;
        Ok(DataLinks { sender: Some(sender), receiver: None })
    }
}

/// Creates a single manual-credit data receiver.
#[derive(Debug, Clone)]
pub struct ReceiverLinkCreator {
    pub source: String,
    pub receive_mode: ReceiveMode,
    pub credit: u32,
}

#[async_trait]
impl LinkCreator for ReceiverLinkCreator {
    async fn create_links(&self, ctx: &Context, session: &Arc<dyn Session>) -> BusResult<DataLinks> {
        let receiver = session
            .new_receiver(
                ctx,
                ReceiverOptions {
                    source: self.source.clone(),
                    target: None,
                    receive_mode: self.receive_mode,
                    manual_credit: true,
                    credit: self.credit,
                },
            )
            .await?;
        Ok(DataLinks { sender: None, receiver: Some(receiver) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use busline_domain::constants::conditions;
    use busline_domain::NamespaceConfig;

    use super::*;
    use crate::namespace::Namespace;
    use crate::testing::{FakeBroker, FakeConnector, FakeTokenProvider};

    /// Counts how often links are created.
    struct CountingCreator {
        inner: SenderLinkCreator,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LinkCreator for CountingCreator {
        async fn create_links(
            &self,
            ctx: &Context,
            session: &Arc<dyn Session>,
        ) -> BusResult<DataLinks> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.create_links(ctx, session).await
        }
    }

    fn namespace(broker: &FakeBroker) -> Arc<Namespace> {
        Arc::new(Namespace::new(
            NamespaceConfig { host: "sb.test".into(), ..NamespaceConfig::default() },
            Arc::new(FakeConnector::new(broker.clone())),
            Arc::new(FakeTokenProvider::default()),
        ))
    }

    fn link_set(broker: &FakeBroker) -> (LinkSet, Arc<CountingCreator>) {
        let creator = Arc::new(CountingCreator {
            inner: SenderLinkCreator { target: "orders".into() },
            calls: AtomicUsize::new(0),
        });
        let links = LinkSet::new(namespace(broker), "orders", Arc::clone(&creator) as Arc<dyn LinkCreator>);
        (links, creator)
    }

    fn fast_retries() -> RetryOptions {
        RetryOptions::default().max_retries(3).delays(Duration::from_millis(1), Duration::from_millis(5))
    }

    /// Validates lazy creation and caching.
    ///
    /// Assertions:
    /// - Confirms the state moves from `Uninitialized` to `Open`.
    /// - Confirms two `get` calls invoke the creator once and share an id.
    /// - Confirms both entity and management claims were negotiated.
    #[tokio::test]
    async fn test_get_creates_once_and_caches() {
        let broker = FakeBroker::new();
        let (links, creator) = link_set(&broker);
        let ctx = Context::background();
        assert_eq!(links.state().await, LinkSetState::Uninitialized);

        let first = links.get(&ctx).await.unwrap();
        let second = links.get(&ctx).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.id, LinkId { connection: 1, link: 1 });
        assert_eq!(creator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(links.state().await, LinkSetState::Open);
        assert_eq!(
            broker.claims(),
            vec!["amqps://sb.test/orders".to_string(), "amqps://sb.test/orders/$management".to_string()]
        );
    }

    /// Validates the revision advances across a non-permanent close.
    ///
    /// Assertions:
    /// - Confirms the state is `Closed` after `close(false)`.
    /// - Confirms the next `get` yields link revision 2 on the same
    ///   connection.
    #[tokio::test]
    async fn test_close_then_get_bumps_revision() {
        let broker = FakeBroker::new();
        let (links, _) = link_set(&broker);
        let ctx = Context::background();

        links.get(&ctx).await.unwrap();
        links.close(&ctx, false).await.unwrap();
        assert_eq!(links.state().await, LinkSetState::Closed);
        assert_eq!(broker.open_links("orders"), 0);

        let reopened = links.get(&ctx).await.unwrap();
        assert_eq!(reopened.id, LinkId { connection: 1, link: 2 });
    }

    /// Validates permanent close.
    ///
    /// Assertions:
    /// - Ensures `get` fails with `Closed` after `close(true)`.
    /// - Ensures a second close is a no-op.
    /// - Ensures a later non-permanent close does not reopen the set.
    /// - Ensures `recover_if_needed` reports `Closed` for every error class.
    #[tokio::test]
    async fn test_permanent_close_stays_closed() {
        let broker = FakeBroker::new();
        let (links, _) = link_set(&broker);
        let ctx = Context::background();

        let observed = links.get(&ctx).await.unwrap().id;
        links.close(&ctx, true).await.unwrap();
        links.close(&ctx, true).await.unwrap();

        assert_eq!(links.state().await, LinkSetState::ClosedPermanently);
        assert!(matches!(links.get(&ctx).await, Err(BusError::Closed)));

        links.close(&ctx, false).await.unwrap();
        assert_eq!(links.state().await, LinkSetState::ClosedPermanently);
        assert!(matches!(links.get(&ctx).await, Err(BusError::Closed)));

        let busy = BusError::protocol(conditions::SERVER_BUSY, "busy");
        assert_eq!(links.recover_if_needed(&ctx, observed, &busy).await, Err(BusError::Closed));
        assert_eq!(
            links.recover_if_needed(&ctx, observed, &BusError::LinkClosed).await,
            Err(BusError::Closed)
        );
        let denied = BusError::protocol(conditions::UNAUTHORIZED_ACCESS, "denied");
        assert_eq!(links.recover_if_needed(&ctx, observed, &denied).await, Err(BusError::Closed));
    }

    /// Validates that concurrent recoveries of the same revision rebuild
    /// once.
    ///
    /// Assertions:
    /// - Confirms the revision advances by exactly one.
    /// - Confirms the creator ran twice in total.
    #[tokio::test]
    async fn test_concurrent_recovery_rebuilds_once() {
        let broker = FakeBroker::new();
        let (links, creator) = link_set(&broker);
        let ctx = Context::background();
        let observed = links.get(&ctx).await.unwrap().id;

        let err = BusError::LinkClosed;
        let (a, b) = tokio::join!(
            links.recover_if_needed(&ctx, observed, &err),
            links.recover_if_needed(&ctx, observed, &err)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(links.current_id().await, Some(LinkId { connection: 1, link: 2 }));
        assert_eq!(creator.calls.load(Ordering::SeqCst), 2);
    }

    /// Validates connection-level recovery.
    ///
    /// Assertions:
    /// - Confirms a `ConnectionClosed` error replaces the connection.
    /// - Confirms the new id carries connection revision 2.
    #[tokio::test]
    async fn test_connection_recovery_replaces_connection() {
        let broker = FakeBroker::new();
        let (links, _) = link_set(&broker);
        let ctx = Context::background();
        let observed = links.get(&ctx).await.unwrap().id;

        broker.break_connections();
        links.recover_if_needed(&ctx, observed, &BusError::ConnectionClosed).await.unwrap();

        assert_eq!(broker.connections_opened(), 2);
        assert_eq!(links.current_id().await, Some(LinkId { connection: 2, link: 2 }));
    }

    /// Validates fatal and transient handling in recovery.
    ///
    /// Assertions:
    /// - Confirms a server-busy error leaves the links untouched.
    /// - Confirms a cancellation propagates without closing.
    /// - Confirms any other fatal error closes permanently.
    #[tokio::test]
    async fn test_recover_if_needed_fatal_and_transient() {
        let broker = FakeBroker::new();
        let (links, _) = link_set(&broker);
        let ctx = Context::background();
        let observed = links.get(&ctx).await.unwrap().id;

        let busy = BusError::protocol(conditions::SERVER_BUSY, "busy");
        links.recover_if_needed(&ctx, observed, &busy).await.unwrap();
        assert_eq!(links.current_id().await, Some(observed));

        let cancelled = links.recover_if_needed(&ctx, observed, &BusError::Cancelled).await;
        assert_eq!(cancelled, Err(BusError::Cancelled));
        assert_eq!(links.state().await, LinkSetState::Open);

        let denied = BusError::protocol(conditions::UNAUTHORIZED_ACCESS, "denied");
        assert_eq!(links.recover_if_needed(&ctx, observed, &denied).await, Err(denied));
        assert_eq!(links.state().await, LinkSetState::ClosedPermanently);
    }

    /// Validates `close_if_needed` per classification.
    ///
    /// Assertions:
    /// - Confirms cancellation reports `None` and keeps links open.
    /// - Confirms a link error closes only the links.
    /// - Confirms a connection error also drops the connection.
    #[tokio::test]
    async fn test_close_if_needed() {
        let broker = FakeBroker::new();
        let (links, _) = link_set(&broker);
        let ctx = Context::background();
        links.get(&ctx).await.unwrap();

        assert_eq!(links.close_if_needed(&ctx, &BusError::Cancelled).await, RecoveryKind::None);
        assert_eq!(links.state().await, LinkSetState::Open);

        assert_eq!(links.close_if_needed(&ctx, &BusError::LinkClosed).await, RecoveryKind::Link);
        assert_eq!(links.state().await, LinkSetState::Closed);
        assert_eq!(links.get(&ctx).await.unwrap().id.connection, 1);

        assert_eq!(links.close_if_needed(&ctx, &BusError::Eof).await, RecoveryKind::Connection);
        assert_eq!(links.get(&ctx).await.unwrap().id.connection, 2);
    }

    /// Validates the retry wrapper recovers between attempts.
    ///
    /// Assertions:
    /// - Confirms an operation failing once with a link error succeeds on
    ///   the second attempt against fresh links.
    /// - Confirms fatal errors are returned after one attempt.
    #[tokio::test]
    async fn test_retry_recovers_between_attempts() {
        let broker = FakeBroker::new();
        let (links, _) = link_set(&broker);
        let ctx = Context::background();
        let attempts = AtomicUsize::new(0);

        let id = links
            .retry(&ctx, "probe", &fast_retries(), |links, args| {
                let attempts = &attempts;
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if args.attempt == 0 {
                        return Err(BusError::LinkClosed);
                    }
                    Ok(links.id)
                }
            })
            .await
            .unwrap();
        assert_eq!(id, LinkId { connection: 1, link: 2 });
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let fatal_attempts = AtomicUsize::new(0);
        let result: BusResult<()> = links
            .retry(&ctx, "fatal", &fast_retries(), |_, _| {
                let fatal_attempts = &fatal_attempts;
                async move {
                    fatal_attempts.fetch_add(1, Ordering::SeqCst);
                    Err(BusError::MessageTooLarge { size: 10, max: 1 })
                }
            })
            .await;
        assert!(matches!(result, Err(BusError::MessageTooLarge { .. })));
        assert_eq!(fatal_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(links.state().await, LinkSetState::Open);
    }

    /// Validates recovery when the very first `get` fails on a dead shared
    /// connection.
    ///
    /// Assertions:
    /// - Confirms a second link set on the same namespace replaces the
    ///   connection its first attach failed on.
    /// - Confirms the operation runs on connection revision 2.
    #[tokio::test]
    async fn test_retry_recovers_when_first_get_fails() {
        let broker = FakeBroker::new();
        let ns = namespace(&broker);
        let ctx = Context::background();
        let creator = || Arc::new(SenderLinkCreator { target: "orders".into() }) as Arc<dyn LinkCreator>;

        let first = LinkSet::new(Arc::clone(&ns) as Arc<dyn NamespaceLinks>, "orders", creator());
        first.get(&ctx).await.unwrap();
        broker.break_connections();

        let second = LinkSet::new(ns, "orders", creator());
        let id = second
            .retry(&ctx, "send", &fast_retries(), |links, _| async move { Ok(links.id) })
            .await
            .unwrap();

        assert_eq!(id, LinkId { connection: 2, link: 1 });
        assert_eq!(broker.connections_opened(), 2);
    }

    /// Validates that a failed creation leaves nothing half-open.
    ///
    /// Assertions:
    /// - Confirms an attach failure surfaces from `get`.
    /// - Confirms the revision does not advance on failure.
    #[tokio::test]
    async fn test_failed_init_does_not_bump_revision() {
        let broker = FakeBroker::new();
        let (links, _) = link_set(&broker);
        let ctx = Context::background();
        broker.fail_next_attach(BusError::detached(conditions::DETACH_FORCED, "nope"));

        assert!(matches!(links.get(&ctx).await, Err(BusError::Detached { .. })));
        assert_eq!(links.state().await, LinkSetState::Uninitialized);
        assert_eq!(links.get(&ctx).await.unwrap().id.link, 1);
    }
}
