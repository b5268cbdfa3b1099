//! Fake sender and receiver links

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use busline_common::Context;
use busline_domain::constants::{annotations, MANAGEMENT_SUFFIX};
use busline_domain::{BusError, BusResult, DispositionStatus, Message, ReceiveMode, Value};
use parking_lot::Mutex;

use super::broker::FakeBroker;
use crate::ports::{Modification, Receivable, RejectError, Sendable};

#[derive(Default)]
pub(crate) struct LinkState {
    closed: Option<BusError>,
    buffer: VecDeque<Message>,
    credit: u32,
}

/// State of one attached link, shared with the broker registry.
pub(crate) struct LinkShared {
    pub(crate) name: String,
    /// Receiver source or sender target.
    pub(crate) address: String,
    /// Receiver target (the reply-to address of management receivers).
    pub(crate) target: Option<String>,
    pub(crate) connection_id: u64,
    pub(crate) is_receiver: bool,
    state: Mutex<LinkState>,
}

impl LinkShared {
    pub(crate) fn new(
        name: String,
        address: String,
        target: Option<String>,
        connection_id: u64,
        is_receiver: bool,
    ) -> Self {
        Self { name, address, target, connection_id, is_receiver, state: Mutex::default() }
    }

    pub(crate) fn is_management(&self) -> bool {
        self.address.ends_with(MANAGEMENT_SUFFIX)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().closed.is_none()
    }

    pub(crate) fn push(&self, message: Message) {
        let mut state = self.state.lock();
        if state.closed.is_none() {
            state.buffer.push_back(message);
        }
    }

    /// First close wins; later closes keep the original error.
    pub(crate) fn close_with(&self, err: BusError) {
        let mut state = self.state.lock();
        if state.closed.is_none() {
            state.closed = Some(err);
        }
    }

    fn check_open(&self) -> BusResult<()> {
        match &self.state.lock().closed {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Fake sender link.
pub struct FakeSender {
    broker: FakeBroker,
    shared: Arc<LinkShared>,
}

impl FakeSender {
    pub(crate) fn new(broker: FakeBroker, shared: Arc<LinkShared>) -> Self {
        Self { broker, shared }
    }
}

#[async_trait]
impl Sendable for FakeSender {
    async fn send(&self, _ctx: &Context, message: Message) -> BusResult<()> {
        self.shared.check_open()?;
        self.broker.accept_transfer(&self.shared.address, message)
    }

    fn max_message_size(&self) -> u64 {
        self.broker.max_message_size()
    }

    fn link_name(&self) -> &str {
        &self.shared.name
    }

    async fn close(&self, _ctx: &Context) -> BusResult<()> {
        self.shared.close_with(BusError::LinkClosed);
        Ok(())
    }
}

/// Fake receiver link.
///
/// Manual-credit receivers pull from the entity only while they hold
/// credit; others receive whatever the broker pushes to them.
pub struct FakeReceiver {
    broker: FakeBroker,
    shared: Arc<LinkShared>,
    receive_mode: ReceiveMode,
    manual_credit: bool,
}

impl FakeReceiver {
    pub(crate) fn new(
        broker: FakeBroker,
        shared: Arc<LinkShared>,
        receive_mode: ReceiveMode,
        manual_credit: bool,
    ) -> Self {
        Self { broker, shared, receive_mode, manual_credit }
    }

    /// Number of messages sitting in the local buffer.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    fn try_take(&self) -> Option<BusResult<Message>> {
        let mut state = self.shared.state.lock();
        if let Some(err) = &state.closed {
            return Some(Err(err.clone()));
        }
        if let Some(message) = state.buffer.pop_front() {
            return Some(Ok(message));
        }
        if !self.manual_credit || state.credit == 0 {
            return None;
        }
        let message = self.broker.take_delivery(&self.shared.address, self.receive_mode)?;
        state.credit -= 1;
        Some(Ok(message))
    }

    fn settle(
        &self,
        status: DispositionStatus,
        message: &Message,
        reason: Option<String>,
    ) -> BusResult<()> {
        self.shared.check_open()?;
        self.broker.settle_on_link(&self.shared.address, status, message, reason)
    }
}

#[async_trait]
impl Receivable for FakeReceiver {
    fn issue_credit(&self, credit: u32) -> BusResult<()> {
        let mut state = self.shared.state.lock();
        if let Some(err) = &state.closed {
            return Err(err.clone());
        }
        state.credit = state.credit.saturating_add(credit);
        drop(state);
        self.broker.wake();
        Ok(())
    }

    async fn drain_credit(&self, ctx: &Context) -> BusResult<()> {
        self.shared.check_open()?;
        if let Some(err) = self.broker.next_drain_failure() {
            return Err(err);
        }
        if self.broker.drain_hangs() {
            return Err(ctx.done().await.into());
        }

        let mut state = self.shared.state.lock();
        while state.credit > 0 {
            let Some(message) = self.broker.take_delivery(&self.shared.address, self.receive_mode)
            else {
                break;
            };
            state.buffer.push_back(message);
            state.credit -= 1;
        }
        state.credit = 0;
        Ok(())
    }

    fn credits(&self) -> u32 {
        self.shared.state.lock().credit
    }

    async fn receive(&self, ctx: &Context) -> BusResult<Message> {
        loop {
            let notified = self.broker.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.try_take() {
                return result;
            }
            ctx.run(notified).await?;
        }
    }

    fn prefetched(&self) -> Option<Message> {
        self.shared.state.lock().buffer.pop_front()
    }

    async fn accept(&self, _ctx: &Context, message: &Message) -> BusResult<()> {
        self.settle(DispositionStatus::Completed, message, None)
    }

    async fn modify(
        &self,
        _ctx: &Context,
        message: &Message,
        modification: Modification,
    ) -> BusResult<()> {
        let status = if modification.undeliverable_here {
            DispositionStatus::Deferred
        } else {
            DispositionStatus::Abandoned
        };
        self.settle(status, message, None)
    }

    async fn reject(&self, _ctx: &Context, message: &Message, error: RejectError) -> BusResult<()> {
        let reason = reason_from(&error.info);
        self.settle(DispositionStatus::Suspended, message, reason)
    }

    fn link_name(&self) -> &str {
        &self.shared.name
    }

    async fn close(&self, _ctx: &Context) -> BusResult<()> {
        self.shared.close_with(BusError::LinkClosed);
        self.broker.wake();
        Ok(())
    }
}

fn reason_from(info: &BTreeMap<String, Value>) -> Option<String> {
    info.get(annotations::DEADLETTER_REASON).and_then(Value::as_str).map(str::to_string)
}
