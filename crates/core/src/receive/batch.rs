//! Batch receive with dual timeouts and a drain phase

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use busline_common::Context;
use busline_domain::{BusError, BusResult, Message, ReceiveMode, ReceivedMessage, ReceiverConfig};
use tracing::{debug, instrument, warn};

use crate::links::LinkSet;
use crate::ports::Receivable;
use crate::recovery::is_fatal;

/// Clears the receiving flag when a receive call ends.
struct ReceivingGuard<'a>(&'a AtomicBool);

impl Drop for ReceivingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Pull-based batch receiver over a [`LinkSet`] with a data receiver.
#[derive(Debug)]
pub struct BatchReceiver {
    links: Arc<LinkSet>,
    receive_mode: ReceiveMode,
    drain_timeout: Duration,
    receiving: AtomicBool,
}

impl BatchReceiver {
    pub fn new(links: Arc<LinkSet>, config: &ReceiverConfig) -> Self {
        Self {
            links,
            receive_mode: config.receive_mode,
            drain_timeout: config.drain_timeout,
            receiving: AtomicBool::new(false),
        }
    }

    /// Receive up to `max_messages`.
    ///
    /// Waits at most `max_wait` for the first message and then at most
    /// `max_wait_after_first` for the rest. Outstanding credit is drained
    /// afterwards; messages that arrive during the drain are included, so
    /// the batch may exceed `max_messages` when the link held extra credit.
    ///
    /// # Errors
    /// - [`BusError::InvalidInput`] for a zero batch or a concurrent call.
    /// - A fatal error when no message was received. Non-fatal failures
    ///   close the affected links and yield an empty batch.
    #[instrument(skip(self, ctx), fields(entity = %self.links.entity_path()))]
    pub async fn receive(
        &self,
        ctx: &Context,
        max_messages: u32,
        max_wait: Duration,
        max_wait_after_first: Duration,
    ) -> BusResult<Vec<ReceivedMessage>> {
        if max_messages == 0 {
            return Err(BusError::invalid_input("max_messages must be greater than zero"));
        }
        if self.receiving.swap(true, Ordering::SeqCst) {
            return Err(BusError::invalid_input("receiver is already receiving messages"));
        }
        let _guard = ReceivingGuard(&self.receiving);

        let links = match self.links.get(ctx).await {
            Ok(links) => links,
            Err(err) => return self.empty_or_fatal(ctx, err).await,
        };
        let receiver = links.receiver()?;

        let credits = receiver.credits();
        if max_messages > credits {
            if let Err(err) = receiver.issue_credit(max_messages - credits) {
                return self.empty_or_fatal(ctx, err).await;
            }
        }

        let (mut messages, failure) =
            Self::fetch(ctx, receiver.as_ref(), max_messages, max_wait, max_wait_after_first).await;

        match failure {
            Some(err) => {
                messages.extend(flush_prefetched(receiver.as_ref()));
                let kind = self.links.close_if_needed(ctx, &err).await;
                if messages.is_empty() {
                    if is_fatal(&err) {
                        return Err(err);
                    }
                    debug!(error = %err, kind = %kind, "Receive failed, returning empty batch");
                } else {
                    debug!(error = %err, kind = %kind, count = messages.len(), "Receive failed after partial batch");
                }
            }
            None if receiver.credits() > 0 => {
                messages.extend(self.drain(receiver.as_ref()).await);
            }
            None => {}
        }

        let settled = self.receive_mode == ReceiveMode::ReceiveAndDelete;
        let link_name = receiver.link_name().to_string();
        Ok(messages
            .into_iter()
            .map(|message| ReceivedMessage::from_link(message, links.id, &link_name, settled))
            .collect())
    }

    /// Receive until the batch is full or a timer fires. Expiry of the
    /// internal timers ends the loop normally; any other error (including
    /// caller cancellation) is returned next to what was collected.
    async fn fetch(
        ctx: &Context,
        receiver: &dyn Receivable,
        max_messages: u32,
        max_wait: Duration,
        max_wait_after_first: Duration,
    ) -> (Vec<Message>, Option<BusError>) {
        let mut messages = Vec::new();
        let mut active = ctx.with_timeout(max_wait);

        while messages.len() < max_messages as usize {
            match receiver.receive(&active).await {
                Ok(message) => {
                    if messages.is_empty() {
                        active = active.with_timeout(max_wait_after_first);
                    }
                    messages.push(message);
                }
                Err(err) if err.is_cancellation() && ctx.err().is_none() => break,
                Err(err) => return (messages, Some(err)),
            }
        }
        (messages, None)
    }

    /// Reclaim outstanding credit. Runs on its own bounded context; a failed
    /// or timed-out drain closes the links and is not reported.
    async fn drain(&self, receiver: &dyn Receivable) -> Vec<Message> {
        let drain_ctx = Context::background().with_timeout(self.drain_timeout);
        if let Err(err) = receiver.drain_credit(&drain_ctx).await {
            warn!(error = %err, "Drain failed, closing links");
            let flushed = flush_prefetched(receiver);
            if let Err(close_err) = self.links.close(&Context::background(), false).await {
                debug!(error = %close_err, "Error closing links after failed drain");
            }
            return flushed;
        }
        flush_prefetched(receiver)
    }

    async fn empty_or_fatal(&self, ctx: &Context, err: BusError) -> BusResult<Vec<ReceivedMessage>> {
        if is_fatal(&err) {
            return Err(err);
        }
        let kind = self.links.close_if_needed(ctx, &err).await;
        debug!(error = %err, kind = %kind, "Receive setup failed, returning empty batch");
        Ok(Vec::new())
    }
}

fn flush_prefetched(receiver: &dyn Receivable) -> Vec<Message> {
    std::iter::from_fn(|| receiver.prefetched()).collect()
}
