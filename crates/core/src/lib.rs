//! # Busline Core
//!
//! Link lifecycle and recovery for an AMQP message-broker client.
//!
//! This crate contains:
//! - Transport ports (traits) the AMQP layer is driven through
//! - Error classification into recovery actions
//! - The namespace connection owner and its claim renewal
//! - Link sets with revision-guarded recovery
//! - Management RPC, settlement and batch receive
//! - Sender and receiver facades
//!
//! ## Architecture Principles
//! - Only depends on `busline-common` and `busline-domain`
//! - No sockets or codecs: the wire is reached through [`ports`]
//! - In-memory fakes for every port live in `testing` (`test-utils` feature)

pub mod client;
pub mod links;
pub mod management;
pub mod namespace;
pub mod ports;
pub mod receive;
pub mod recovery;
pub mod settlement;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "test-utils", test))]
pub mod testing;

pub use client::{Client, ClientError, ClientResult, MessageReceiver, MessageSender};
pub use links::{LinkSet, LinkSetState, Links, NamespaceLinks};
pub use management::{ManagementClient, RpcLink};
pub use namespace::Namespace;
pub use ports::{
    Connection, Connector, Receivable, ReceiverOptions, Sendable, SenderOptions, Session,
    TokenProvider,
};
pub use receive::BatchReceiver;
pub use recovery::{classify, is_fatal};
pub use settlement::Settler;
