//! Fake connector, connection, session and token provider

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use busline_common::Context;
use busline_domain::{AccessToken, BusError, BusResult};
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use super::broker::FakeBroker;
use super::links::{FakeReceiver, FakeSender, LinkShared};
use crate::ports::{
    Connection, Connector, Receivable, ReceiverOptions, Sendable, SenderOptions, Session,
    TokenProvider,
};

static LINK_NAMES: AtomicU64 = AtomicU64::new(0);

fn link_name(prefix: &str) -> String {
    format!("{prefix}-{}", LINK_NAMES.fetch_add(1, Ordering::Relaxed) + 1)
}

/// Connects to a [`FakeBroker`].
pub struct FakeConnector {
    broker: FakeBroker,
}

impl FakeConnector {
    pub fn new(broker: FakeBroker) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _ctx: &Context, _host: &str) -> BusResult<Arc<dyn Connection>> {
        let id = self.broker.open_connection()?;
        Ok(Arc::new(FakeConnection { broker: self.broker.clone(), id, closed: AtomicBool::new(false) }))
    }
}

/// One fake physical connection.
pub struct FakeConnection {
    broker: FakeBroker,
    id: u64,
    closed: AtomicBool,
}

impl FakeConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn new_session(&self, _ctx: &Context) -> BusResult<Arc<dyn Session>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionClosed);
        }
        self.broker.open_session(self.id)?;
        Ok(Arc::new(FakeSession::new(self.broker.clone(), self.id)))
    }

    async fn put_token(&self, _ctx: &Context, audience: &str, _token: &AccessToken) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionClosed);
        }
        self.broker.record_claim(self.id, audience)
    }

    async fn close(&self) -> BusResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.broker.close_connection(self.id);
        }
        Ok(())
    }
}

/// One fake session on a fake connection.
pub struct FakeSession {
    broker: FakeBroker,
    connection_id: u64,
}

impl FakeSession {
    /// A session on connection `connection_id`; the broker opens it on
    /// demand so tests can skip the connector.
    pub fn new(broker: FakeBroker, connection_id: u64) -> Self {
        broker.ensure_connection(connection_id);
        Self { broker, connection_id }
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn new_sender(
        &self,
        _ctx: &Context,
        options: SenderOptions,
    ) -> BusResult<Arc<dyn Sendable>> {
        let shared = self.broker.attach(Arc::new(LinkShared::new(
            link_name("sender"),
            options.target,
            None,
            self.connection_id,
            false,
        )))?;
        Ok(Arc::new(FakeSender::new(self.broker.clone(), shared)))
    }

    async fn new_receiver(
        &self,
        _ctx: &Context,
        options: ReceiverOptions,
    ) -> BusResult<Arc<dyn Receivable>> {
        let shared = self.broker.attach(Arc::new(LinkShared::new(
            link_name("receiver"),
            options.source,
            options.target,
            self.connection_id,
            true,
        )))?;
        Ok(Arc::new(FakeReceiver::new(
            self.broker.clone(),
            shared,
            options.receive_mode,
            options.manual_credit,
        )))
    }

    async fn close(&self, _ctx: &Context) -> BusResult<()> {
        Ok(())
    }
}

/// Issues tokens valid for one hour and counts requests.
#[derive(Default)]
pub struct FakeTokenProvider {
    issued: AtomicUsize,
    failures: Mutex<Vec<BusError>>,
}

impl FakeTokenProvider {
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, err: BusError) {
        self.failures.lock().push(err);
    }
}

#[async_trait]
impl TokenProvider for FakeTokenProvider {
    async fn get_token(&self, audience: &str) -> BusResult<AccessToken> {
        if let Some(err) = self.failures.lock().pop() {
            return Err(err);
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken {
            token: format!("token-for-{audience}"),
            token_type: "jwt".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}
