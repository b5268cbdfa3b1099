//! Public client surface
//!
//! [`Client`] owns the namespace connection; senders and receivers created
//! from it share that connection and each hold their own link set.

mod error;
mod receiver;
mod sender;

use std::sync::Arc;

use busline_domain::{BusResult, ClientConfig, Entity, ReceiverConfig};
use tracing::info;

pub use error::{ClientError, ClientResult, SERVER_BUSY_RETRY_AFTER};
pub use receiver::MessageReceiver;
pub use sender::MessageSender;

use crate::links::NamespaceLinks;
use crate::namespace::Namespace;
use crate::ports::{Connector, TokenProvider};

/// Entry point: one connection, any number of senders and receivers.
#[derive(Debug, Clone)]
pub struct Client {
    namespace: Arc<Namespace>,
    config: ClientConfig,
}

impl Client {
    /// Build a client. No I/O happens until the first operation.
    ///
    /// # Errors
    /// Returns [`busline_domain::BusError::Config`] when `config` fails
    /// validation.
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> BusResult<Self> {
        config.validate()?;
        let namespace = Namespace::new(config.namespace.clone(), connector, tokens);
        info!(host = %namespace.host(), "Client created");
        Ok(Self { namespace: Arc::new(namespace), config })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn new_sender(&self, entity: &Entity) -> MessageSender {
        MessageSender::new(self.namespace.clone(), entity, self.config.retry.clone())
    }

    /// Receiver using the client's receiver configuration.
    #[must_use]
    pub fn new_receiver(&self, entity: &Entity) -> MessageReceiver {
        self.new_receiver_with(entity, self.config.receiver.clone())
    }

    #[must_use]
    pub fn new_receiver_with(&self, entity: &Entity, config: ReceiverConfig) -> MessageReceiver {
        MessageReceiver::new(self.namespace.clone(), entity, config, self.config.retry.clone())
    }

    /// Close the connection for good. Senders and receivers created from
    /// this client fail with `Closed` afterwards.
    pub async fn close(&self) -> ClientResult<()> {
        self.namespace.close(true).await.map_err(Into::into)
    }
}
