//! Connection owner
//!
//! A [`Namespace`] owns at most one live physical connection, created lazily
//! and replaced wholesale on recovery. Every replacement bumps the
//! connection revision so that concurrent recoveries of the same dead
//! connection collapse into one.

mod claims;

use std::sync::Arc;

use async_trait::async_trait;
use busline_common::Context;
use busline_domain::{BusError, BusResult, NamespaceConfig};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub use claims::{ClaimRenewal, RenewalTiming};

use crate::links::NamespaceLinks;
use crate::ports::{Connection, Connector, Session, TokenProvider};

#[derive(Default)]
struct ConnectionState {
    connection: Option<Arc<dyn Connection>>,
    revision: u64,
    closed_permanently: bool,
}

struct Inner {
    config: NamespaceConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    state: Mutex<ConnectionState>,
    // The claims node accepts one negotiation at a time per connection.
    claim_lock: Mutex<()>,
}

/// Owner of the physical connection to one broker host.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace").field("host", &self.inner.config.host).finish_non_exhaustive()
    }
}

impl Namespace {
    pub fn new(
        config: NamespaceConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                tokens,
                state: Mutex::new(ConnectionState::default()),
                claim_lock: Mutex::new(()),
            }),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Current connection revision; zero before the first connection.
    pub async fn revision(&self) -> u64 {
        self.inner.state.lock().await.revision
    }

    /// The live connection and its revision, connecting if needed.
    ///
    /// # Errors
    /// [`BusError::Closed`] after a permanent close, or the connect error.
    pub async fn connection(&self, ctx: &Context) -> BusResult<(Arc<dyn Connection>, u64)> {
        let mut state = self.inner.state.lock().await;
        self.connection_locked(ctx, &mut state).await
    }

    async fn connection_locked(
        &self,
        ctx: &Context,
        state: &mut ConnectionState,
    ) -> BusResult<(Arc<dyn Connection>, u64)> {
        if state.closed_permanently {
            return Err(BusError::Closed);
        }
        if let Some(connection) = &state.connection {
            return Ok((Arc::clone(connection), state.revision));
        }

        let host = &self.inner.config.host;
        let connection = ctx.run(self.inner.connector.connect(ctx, host)).await??;
        state.revision += 1;
        state.connection = Some(Arc::clone(&connection));
        info!(host = %host, revision = state.revision, "Connection opened");
        Ok((connection, state.revision))
    }

    /// Fetch a token for `audience` and put it on the connection.
    async fn negotiate_once(&self, ctx: &Context, audience: &str) -> BusResult<DateTime<Utc>> {
        let (connection, _) = self.connection(ctx).await?;
        let token = ctx.run(self.inner.tokens.get_token(audience)).await??;

        let _guard = ctx.run(self.inner.claim_lock.lock()).await?;
        ctx.run(connection.put_token(ctx, audience, &token)).await??;
        debug!(audience, expires_at = %token.expires_at, "Claim negotiated");
        Ok(token.expires_at)
    }

    fn renewal_timing(&self) -> RenewalTiming {
        RenewalTiming {
            refresh_threshold: self.inner.config.claim_refresh_threshold,
            retry_interval: self.inner.config.claim_retry_interval,
        }
    }
}

#[async_trait]
impl NamespaceLinks for Namespace {
    #[instrument(skip(self, ctx), fields(host = %self.inner.config.host))]
    async fn negotiate_claim(&self, ctx: &Context, entity_path: &str) -> BusResult<ClaimRenewal> {
        let audience = self.entity_audience(entity_path);
        let expiry = self.negotiate_once(ctx, &audience).await?;

        let namespace = self.clone();
        let renew_audience = audience.clone();
        Ok(ClaimRenewal::spawn(audience, expiry, self.renewal_timing(), move || {
            let namespace = namespace.clone();
            let audience = renew_audience.clone();
            async move { namespace.negotiate_once(&Context::background(), &audience).await }
        }))
    }

    async fn new_session(&self, ctx: &Context) -> BusResult<(Arc<dyn Session>, u64)> {
        let (connection, revision) = self.connection(ctx).await?;
        let session = ctx.run(connection.new_session(ctx)).await??;
        Ok((session, revision))
    }

    async fn connection_revision(&self) -> u64 {
        self.revision().await
    }

    fn entity_audience(&self, entity_path: &str) -> String {
        format!("amqps://{}/{}", self.inner.config.host, entity_path)
    }

    #[instrument(skip(self, ctx), fields(host = %self.inner.config.host))]
    async fn recover_connection(&self, ctx: &Context, observed_revision: u64) -> BusResult<()> {
        let mut state = self.inner.state.lock().await;
        if state.closed_permanently {
            return Err(BusError::Closed);
        }
        if state.revision != observed_revision {
            debug!(
                current = state.revision,
                observed = observed_revision,
                "Connection already recovered"
            );
            return Ok(());
        }

        if let Some(old) = state.connection.take() {
            if let Err(err) = old.close().await {
                warn!(error = %err, "Error closing connection during recovery");
            }
        }

        info!(revision = state.revision, "Recovering connection");
        self.connection_locked(ctx, &mut state).await.map(|_| ())
    }

    async fn close(&self, permanent: bool) -> BusResult<()> {
        let mut state = self.inner.state.lock().await;
        if permanent {
            state.closed_permanently = true;
        }
        match state.connection.take() {
            Some(connection) => {
                debug!(permanent, revision = state.revision, "Closing connection");
                connection.close().await
            }
            None => Ok(()),
        }
    }
}
