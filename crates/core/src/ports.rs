//! Port interfaces for the AMQP substrate
//!
//! These traits are the boundary between the recovery manager and the
//! AMQP 1.0 library that owns frame encoding. They are small capability
//! interfaces so that tests can substitute in-memory fakes
//! (see [`crate::testing`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use busline_common::Context;
use busline_domain::{AccessToken, BusResult, Message, ReceiveMode, Value};

/// Options for attaching a sender link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderOptions {
    /// Target address (entity or management path).
    pub target: String,
}

/// Options for attaching a receiver link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOptions {
    /// Source address (entity or management path).
    pub source: String,
    /// Local target address; the reply-to address for request/response links.
    pub target: Option<String>,
    pub receive_mode: ReceiveMode,
    /// When true the link only receives what [`Receivable::issue_credit`]
    /// grants; otherwise the substrate keeps `credit` outstanding itself.
    pub manual_credit: bool,
    pub credit: u32,
}

/// Fields of a `modified` outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modification {
    pub delivery_failed: bool,
    pub undeliverable_here: bool,
    pub annotations: BTreeMap<String, Value>,
}

/// Error attached to a `rejected` outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectError {
    pub condition: String,
    pub description: Option<String>,
    pub info: BTreeMap<String, Value>,
}

/// A sender link.
#[async_trait]
pub trait Sendable: Send + Sync {
    /// Transfer one message and wait for the broker's acknowledgement.
    async fn send(&self, ctx: &Context, message: Message) -> BusResult<()>;

    /// Largest message the peer accepts on this link, in bytes.
    fn max_message_size(&self) -> u64;

    fn link_name(&self) -> &str;

    async fn close(&self, ctx: &Context) -> BusResult<()>;
}

/// A receiver link.
#[async_trait]
pub trait Receivable: Send + Sync {
    /// Grant the broker `credit` more deliveries.
    fn issue_credit(&self, credit: u32) -> BusResult<()>;

    /// Ask the broker to use up or return all outstanding credit; resolves
    /// once the drain handshake completes.
    async fn drain_credit(&self, ctx: &Context) -> BusResult<()>;

    /// Credit currently outstanding on the link.
    fn credits(&self) -> u32;

    /// Wait for the next delivery. Must be cancel-safe: dropping the future
    /// never loses a message.
    async fn receive(&self, ctx: &Context) -> BusResult<Message>;

    /// A delivery that has already arrived, without waiting.
    fn prefetched(&self) -> Option<Message>;

    async fn accept(&self, ctx: &Context, message: &Message) -> BusResult<()>;

    async fn modify(
        &self,
        ctx: &Context,
        message: &Message,
        modification: Modification,
    ) -> BusResult<()>;

    async fn reject(&self, ctx: &Context, message: &Message, error: RejectError) -> BusResult<()>;

    fn link_name(&self) -> &str;

    async fn close(&self, ctx: &Context) -> BusResult<()>;
}

/// An AMQP session.
#[async_trait]
pub trait Session: Send + Sync {
    async fn new_sender(&self, ctx: &Context, options: SenderOptions)
        -> BusResult<Arc<dyn Sendable>>;

    async fn new_receiver(
        &self,
        ctx: &Context,
        options: ReceiverOptions,
    ) -> BusResult<Arc<dyn Receivable>>;

    async fn close(&self, ctx: &Context) -> BusResult<()>;
}

/// A physical AMQP connection.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn new_session(&self, ctx: &Context) -> BusResult<Arc<dyn Session>>;

    /// Put `token` on the claims-based-security node for `audience`. Only
    /// one negotiation may be in flight per connection.
    async fn put_token(&self, ctx: &Context, audience: &str, token: &AccessToken)
        -> BusResult<()>;

    async fn close(&self) -> BusResult<()>;
}

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, ctx: &Context, host: &str) -> BusResult<Arc<dyn Connection>>;
}

/// Source of security tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, audience: &str) -> BusResult<AccessToken>;
}
