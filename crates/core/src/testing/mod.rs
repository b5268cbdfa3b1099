//! In-memory AMQP substrate for tests
//!
//! [`FakeBroker`] stores entity queues, serves the `$management` node and
//! records every settlement, claim and connection. The connector, session
//! and link fakes implement the [`crate::ports`] traits on top of it.
//!
//! Failure injection is queue based: each `fail_next_*` call makes exactly
//! one later operation of that kind fail with the given error.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use busline_core::testing::{FakeBroker, FakeConnector, FakeTokenProvider};
//! use busline_domain::Message;
//!
//! let broker = FakeBroker::new();
//! broker.enqueue("orders", Message::with_body(b"hello".to_vec()));
//! let connector = Arc::new(FakeConnector::new(broker.clone()));
//! let tokens = Arc::new(FakeTokenProvider::default());
//! # let _ = (connector, tokens);
//! ```

// Fakes fail through their return types; panics only mean a broken test.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod broker;
mod connection;
mod links;

pub use broker::{FakeBroker, Settlement, SettlementPath, DEFAULT_MAX_MESSAGE_SIZE};
pub use connection::{FakeConnection, FakeConnector, FakeSession, FakeTokenProvider};
pub use links::{FakeReceiver, FakeSender};
