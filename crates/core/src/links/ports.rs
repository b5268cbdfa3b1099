//! Port interfaces consumed by the link set

use std::sync::Arc;

use async_trait::async_trait;
use busline_common::Context;
use busline_domain::BusResult;

use crate::management::ManagementClient;
use crate::namespace::ClaimRenewal;
use crate::ports::{Receivable, Sendable, Session};

/// What a link set needs from the connection owner.
#[async_trait]
pub trait NamespaceLinks: Send + Sync {
    /// Negotiate a claim for `entity_path` and keep it renewed until the
    /// returned handle is stopped.
    async fn negotiate_claim(&self, ctx: &Context, entity_path: &str) -> BusResult<ClaimRenewal>;

    /// Open a session on the current connection, returning it with the
    /// connection revision it belongs to.
    async fn new_session(&self, ctx: &Context) -> BusResult<(Arc<dyn Session>, u64)>;

    /// Open the request/response management client for `management_path`
    /// over `session`.
    async fn new_management_client(
        &self,
        ctx: &Context,
        session: &Arc<dyn Session>,
        management_path: &str,
    ) -> BusResult<Arc<ManagementClient>> {
        Ok(Arc::new(ManagementClient::open(ctx, session, management_path).await?))
    }

    /// Revision of the cached connection; zero before the first connect.
    async fn connection_revision(&self) -> u64;

    /// Token audience for `entity_path`.
    fn entity_audience(&self, entity_path: &str) -> String;

    /// Replace the physical connection unless it was already replaced since
    /// `observed_revision`.
    async fn recover_connection(&self, ctx: &Context, observed_revision: u64) -> BusResult<()>;

    /// Close the physical connection. A permanent close rejects all further
    /// sessions.
    async fn close(&self, permanent: bool) -> BusResult<()>;
}

/// Data links built by a [`LinkCreator`].
#[derive(Clone, Default)]
pub struct DataLinks {
    pub sender: Option<Arc<dyn Sendable>>,
    pub receiver: Option<Arc<dyn Receivable>>,
}

/// Builds the data sender and/or receiver over a fresh session.
#[async_trait]
pub trait LinkCreator: Send + Sync {
    async fn create_links(&self, ctx: &Context, session: &Arc<dyn Session>)
        -> BusResult<DataLinks>;
}
