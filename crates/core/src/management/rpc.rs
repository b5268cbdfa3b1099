//! Request/response correlation over a sender/receiver link pair
//!
//! Requests carry a fresh message id; the broker echoes it as the response
//! correlation id. A single router task receives every response and hands it
//! to the waiting caller through the pending map. When the router stops it
//! broadcasts its terminal error to every waiter and marks the map closed so
//! that later requests fail fast instead of waiting forever.

use std::collections::HashMap;
use std::sync::Arc;

use busline_common::Context;
use busline_domain::constants::properties;
use busline_domain::{BusError, BusResult, Message, ReceiveMode, Value};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::ports::{Receivable, ReceiverOptions, Sendable, SenderOptions, Session};

const RESPONSE_CREDIT: u32 = 2048;

type Waiter = oneshot::Sender<BusResult<Message>>;

#[derive(Default)]
struct PendingMap {
    waiters: HashMap<String, Waiter>,
    /// Terminal error once the router has stopped.
    closed: Option<BusError>,
}

impl PendingMap {
    fn close_with(&mut self, err: &BusError) {
        self.closed = Some(err.clone());
        for (_, waiter) in self.waiters.drain() {
            // The caller may have given up already.
            let _ = waiter.send(Err(err.clone()));
        }
    }
}

/// A decoded management response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    pub code: i64,
    pub description: String,
    pub message: Message,
}

/// Correlating request/response link.
pub struct RpcLink {
    address: String,
    reply_to: String,
    sender: Arc<dyn Sendable>,
    receiver: Arc<dyn Receivable>,
    pending: Arc<Mutex<PendingMap>>,
    shutdown: CancellationToken,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RpcLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLink")
            .field("address", &self.address)
            .field("reply_to", &self.reply_to)
            .finish_non_exhaustive()
    }
}

impl RpcLink {
    /// Attach the link pair for `address` over `session` and start the
    /// response router.
    ///
    /// # Errors
    /// Returns the link attach error; a half-attached pair is closed first.
    pub async fn open(ctx: &Context, session: &Arc<dyn Session>, address: &str) -> BusResult<Self> {
        let reply_to = format!("{address}-client-{}", Uuid::new_v4());

        let sender = session.new_sender(ctx, SenderOptions { target: address.to_string() }).await?;
        let receiver = match session
            .new_receiver(
                ctx,
                ReceiverOptions {
                    source: address.to_string(),
                    target: Some(reply_to.clone()),
                    receive_mode: ReceiveMode::ReceiveAndDelete,
                    manual_credit: false,
                    credit: RESPONSE_CREDIT,
                },
            )
            .await
        {
            Ok(receiver) => receiver,
            Err(err) => {
                if let Err(close_err) = sender.close(ctx).await {
                    debug!(error = %close_err, "Failed to close management sender after attach error");
                }
                return Err(err);
            }
        };

        let pending = Arc::new(Mutex::new(PendingMap::default()));
        let shutdown = CancellationToken::new();
        let router = tokio::spawn(route_responses(
            address.to_string(),
            Arc::clone(&receiver),
            Arc::clone(&pending),
            shutdown.clone(),
        ));

        Ok(Self {
            address: address.to_string(),
            reply_to,
            sender,
            receiver,
            pending,
            shutdown,
            router: Mutex::new(Some(router)),
        })
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send `request` and wait for its correlated response.
    ///
    /// # Errors
    /// - The context error if `ctx` finishes first.
    /// - The router's terminal error if the link died.
    /// - [`BusError::Management`] for a non-2xx status.
    #[instrument(skip(self, ctx, request), fields(address = %self.address, correlation_id = tracing::field::Empty))]
    pub async fn rpc(&self, ctx: &Context, mut request: Message) -> BusResult<RpcResponse> {
        let correlation_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        request.properties.message_id = Some(correlation_id.clone());
        request.properties.reply_to = Some(self.reply_to.clone());
        if let Some(remaining) = ctx.remaining() {
            request
                .application_properties
                .entry(properties::SERVER_TIMEOUT.to_string())
                .or_insert_with(|| {
                    Value::UInt(u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX))
                });
        }

        let response = {
            let mut pending = self.pending.lock();
            if let Some(err) = &pending.closed {
                return Err(err.clone());
            }
            let (tx, rx) = oneshot::channel();
            pending.waiters.insert(correlation_id.clone(), tx);
            rx
        };

        if let Err(err) = self.sender.send(ctx, request).await {
            self.pending.lock().waiters.remove(&correlation_id);
            return Err(err);
        }

        let message = match ctx.run(response).await {
            Ok(Ok(result)) => result?,
            // Router dropped the waiter without answering.
            Ok(Err(_)) => return Err(BusError::LinkClosed),
            Err(ctx_err) => {
                self.pending.lock().waiters.remove(&correlation_id);
                return Err(ctx_err.into());
            }
        };

        let response = decode_status(message)?;
        if !(200..300).contains(&response.code) {
            return Err(BusError::management(response.code, response.description));
        }
        Ok(response)
    }

    /// Stop the router and detach both links.
    ///
    /// # Errors
    /// Returns the joined link close errors.
    pub async fn close(&self, ctx: &Context) -> BusResult<()> {
        self.shutdown.cancel();
        let router = self.router.lock().take();
        if let Some(router) = router {
            if let Err(err) = router.await {
                warn!(address = %self.address, error = %err, "Response router panicked");
            }
        }

        let mut errors = Vec::new();
        if let Err(err) = self.sender.close(ctx).await {
            errors.push(err);
        }
        if let Err(err) = self.receiver.close(ctx).await {
            errors.push(err);
        }
        BusError::join(errors)
    }
}

async fn route_responses(
    address: String,
    receiver: Arc<dyn Receivable>,
    pending: Arc<Mutex<PendingMap>>,
    shutdown: CancellationToken,
) {
    let ctx = Context::background();

    let terminal = loop {
        let received = tokio::select! {
            () = shutdown.cancelled() => break BusError::LinkClosed,
            received = receiver.receive(&ctx) => received,
        };

        match received {
            Ok(message) => {
                let waiter = message
                    .properties
                    .correlation_id
                    .as_ref()
                    .and_then(|id| pending.lock().waiters.remove(id));

                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(message));
                    }
                    None => warn!(
                        address = %address,
                        correlation_id = ?message.properties.correlation_id,
                        "Dropping management response with no pending request"
                    ),
                }
            }
            Err(err) => {
                debug!(address = %address, error = %err, "Response router stopped");
                break err;
            }
        }
    };

    pending.lock().close_with(&terminal);
}

fn decode_status(message: Message) -> BusResult<RpcResponse> {
    let props = &message.application_properties;
    let code = props
        .get(properties::STATUS_CODE)
        .or_else(|| props.get(properties::LEGACY_STATUS_CODE))
        .and_then(Value::as_i64)
        .ok_or_else(|| BusError::malformed(properties::STATUS_CODE, "missing from response"))?;
    let description = props
        .get(properties::STATUS_DESCRIPTION)
        .or_else(|| props.get(properties::LEGACY_STATUS_DESCRIPTION))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(RpcResponse { code, description, message })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{FakeBroker, FakeSession};

    async fn open(broker: &FakeBroker) -> RpcLink {
        let session: Arc<dyn Session> = Arc::new(FakeSession::new(broker.clone(), 1));
        RpcLink::open(&Context::background(), &session, "orders/$management").await.unwrap()
    }

    fn request(operation: &str) -> Message {
        let mut message = Message::default();
        message
            .application_properties
            .insert(properties::OPERATION.to_string(), Value::from(operation));
        message
    }

    /// Validates the legacy-cased status keys are honoured.
    ///
    /// Assertions:
    /// - Confirms `statusCode`/`statusDescription` are read when the
    ///   standard keys are absent.
    #[test]
    fn test_decode_status_legacy_keys() {
        let mut message = Message::default();
        message.application_properties.insert("statusCode".into(), Value::Int(404));
        message.application_properties.insert("statusDescription".into(), Value::from("gone"));

        let response = decode_status(message).unwrap();
        assert_eq!(response.code, 404);
        assert_eq!(response.description, "gone");
    }

    /// Validates a round trip through the fake broker's management node.
    ///
    /// Assertions:
    /// - Confirms a 200 response is returned.
    /// - Confirms the server-timeout hint was injected from the deadline.
    #[tokio::test]
    async fn test_rpc_round_trip_injects_server_timeout() {
        let broker = FakeBroker::new();
        let link = open(&broker).await;
        let ctx = Context::background().with_timeout(Duration::from_secs(30));

        let response = link.rpc(&ctx, request("com.example:echo")).await.unwrap();
        assert_eq!(response.code, 200);

        let seen = broker.management_requests();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].application_properties.contains_key(properties::SERVER_TIMEOUT));
        link.close(&Context::background()).await.unwrap();
    }

    /// Validates that a non-2xx status becomes a typed management error.
    ///
    /// Assertions:
    /// - Confirms a scripted 503 surfaces as `Management { code: 503 }`.
    #[tokio::test]
    async fn test_non_success_status_is_management_error() {
        let broker = FakeBroker::new();
        broker.fail_next_management(503, "server busy");
        let link = open(&broker).await;

        let err = link.rpc(&Context::background(), request("com.example:echo")).await.unwrap_err();
        assert_eq!(err, BusError::management(503, "server busy"));
    }

    /// Validates that a response with no pending request is ignored and does
    /// not disturb later requests.
    ///
    /// Assertions:
    /// - Confirms a later request still completes with 200.
    #[tokio::test]
    async fn test_uncorrelated_response_is_ignored() {
        let broker = FakeBroker::new();
        let link = open(&broker).await;

        broker.inject_management_response(Some("no-such-request".into()));
        broker.inject_management_response(None);

        let response = link.rpc(&Context::background(), request("com.example:echo")).await.unwrap();
        assert_eq!(response.code, 200);
    }

    /// Validates that a response delivered twice completes its request once.
    ///
    /// Assertions:
    /// - Confirms two copies of an answered request's response are dropped.
    /// - Confirms the next request completes with its own response.
    #[tokio::test]
    async fn test_duplicate_response_is_dropped() {
        let broker = FakeBroker::new();
        let link = open(&broker).await;
        let ctx = Context::background();

        let first = link.rpc(&ctx, request("com.example:echo")).await.unwrap();
        let answered = first.message.properties.correlation_id.clone();
        assert!(answered.is_some());

        broker.inject_management_response(answered.clone());
        broker.inject_management_response(answered.clone());

        let second = link.rpc(&ctx, request("com.example:echo")).await.unwrap();
        assert_eq!(second.code, 200);
        let requests = broker.management_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(second.message.properties.correlation_id, requests[1].properties.message_id);
        assert_ne!(second.message.properties.correlation_id, answered);
    }

    /// Validates that a dead response link fails every pending and future
    /// request.
    ///
    /// Assertions:
    /// - Confirms the in-flight request receives the terminal error.
    /// - Confirms a later request fails fast with the same error.
    #[tokio::test]
    async fn test_router_failure_broadcasts_to_pending() {
        let broker = FakeBroker::new();
        broker.hold_management_responses(true);
        let link = Arc::new(open(&broker).await);

        let in_flight = {
            let link = Arc::clone(&link);
            tokio::spawn(async move {
                link.rpc(&Context::background(), request("com.example:echo")).await
            })
        };
        while broker.management_requests().is_empty() {
            tokio::task::yield_now().await;
        }

        broker.detach_management_receivers(BusError::detached("amqp:link:detach-forced", "bye"));

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, BusError::Detached { .. }));

        let later = link.rpc(&Context::background(), request("com.example:echo")).await;
        assert!(matches!(later, Err(BusError::Detached { .. })));
    }

    /// Validates that caller cancellation unblocks a pending request.
    ///
    /// Assertions:
    /// - Confirms the request returns `DeadlineExceeded`.
    #[tokio::test(start_paused = true)]
    async fn test_rpc_honours_deadline() {
        let broker = FakeBroker::new();
        broker.hold_management_responses(true);
        let link = open(&broker).await;
        let ctx = Context::background().with_timeout(Duration::from_secs(1));

        let err = link.rpc(&ctx, request("com.example:echo")).await.unwrap_err();
        assert_eq!(err, BusError::DeadlineExceeded);
    }
}
