//! Broker state shared by every fake connection

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use busline_domain::constants::{
    annotations, fields, operations, properties, MANAGEMENT_SUFFIX, RECEIVER_SETTLE_MODE_SECOND,
    STATUS_NO_CONTENT,
};
use busline_domain::{
    BusError, BusResult, DispositionStatus, Entity, Message, ReceiveMode, SubQueue, Value,
};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use uuid::Uuid;

use super::links::LinkShared;

/// Largest message the fake links accept unless overridden.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 256 * 1024;

const LOCK_DURATION: Duration = Duration::from_secs(60);

/// Which link carried a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementPath {
    DataLink,
    Management,
}

/// One recorded settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub path: SettlementPath,
    pub entity: String,
    pub status: DispositionStatus,
    pub lock_token: Uuid,
    pub dead_letter_reason: Option<String>,
}

#[derive(Default)]
struct EntityStore {
    active: VecDeque<Message>,
    deferred: BTreeMap<i64, Message>,
    scheduled: BTreeMap<i64, Message>,
    locked: HashMap<Uuid, Message>,
}

#[derive(Default)]
struct BrokerState {
    entities: HashMap<String, EntityStore>,
    next_sequence: i64,
    session_states: HashMap<String, Vec<u8>>,
    management_requests: Vec<Message>,
    management_failures: VecDeque<(i64, String)>,
    hold_management: bool,
    settlements: Vec<Settlement>,
    claims: Vec<String>,
    next_connection: u64,
    connections_opened: u32,
    sessions_opened: u32,
    live_connections: HashSet<u64>,
    connect_failures: VecDeque<BusError>,
    attach_failures: VecDeque<BusError>,
    send_failures: VecDeque<BusError>,
    settlement_failures: VecDeque<BusError>,
    drain_failures: VecDeque<BusError>,
    drain_hangs: bool,
    max_message_size: u64,
}

impl BrokerState {
    fn entity(&mut self, address: &str) -> &mut EntityStore {
        self.entities.entry(address.to_string()).or_default()
    }

    fn assign_sequence(&mut self, message: &mut Message) -> i64 {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        message.annotations.insert(annotations::SEQUENCE_NUMBER.to_string(), Value::Int(sequence));
        message
            .annotations
            .insert(annotations::ENQUEUED_TIME.to_string(), Value::Timestamp(Utc::now()));
        sequence
    }

    fn lock_message(&mut self, address: &str, mut message: Message) -> (Uuid, Message) {
        let token = Uuid::new_v4();
        message.delivery_tag = Some(token);
        message.annotations.insert(
            annotations::LOCKED_UNTIL.to_string(),
            Value::Timestamp(Utc::now() + LOCK_DURATION),
        );
        self.entity(address).locked.insert(token, message.clone());
        (token, message)
    }

    fn settle(
        &mut self,
        address: &str,
        path: SettlementPath,
        status: DispositionStatus,
        lock_token: Uuid,
        dead_letter_reason: Option<String>,
    ) {
        self.settlements.push(Settlement {
            path,
            entity: address.to_string(),
            status,
            lock_token,
            dead_letter_reason: dead_letter_reason.clone(),
        });

        let Some(mut message) = self.entity(address).locked.remove(&lock_token) else {
            return;
        };
        message.delivery_tag = None;
        match status {
            DispositionStatus::Completed => {}
            DispositionStatus::Abandoned => self.entity(address).active.push_front(message),
            DispositionStatus::Deferred => {
                let sequence = message.sequence_number().unwrap_or_default();
                self.entity(address).deferred.insert(sequence, message);
            }
            DispositionStatus::Suspended => {
                if let Some(reason) = dead_letter_reason {
                    message
                        .application_properties
                        .insert(annotations::DEADLETTER_REASON.to_string(), Value::from(reason));
                }
                let dead_letter = Entity::queue(address).path(Some(SubQueue::DeadLetter));
                self.entity(&dead_letter).active.push_back(message);
            }
        }
    }

    fn serve(&mut self, address: &str, request: &Message) -> ManagementOutcome {
        let operation = request
            .application_properties
            .get(properties::OPERATION)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let body = request.body.as_map().cloned().unwrap_or_default();

        match operation.as_str() {
            operations::UPDATE_DISPOSITION => {
                let Some(status) = body
                    .get(fields::DISPOSITION_STATUS)
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<DispositionStatus>().ok())
                else {
                    return ManagementOutcome::error(400, "missing disposition-status");
                };
                let reason = body
                    .get(fields::DEADLETTER_REASON)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                for token in uuids(&body, fields::LOCK_TOKENS) {
                    self.settle(address, SettlementPath::Management, status, token, reason.clone());
                }
                ManagementOutcome::ok(BTreeMap::new())
            }
            operations::RENEW_LOCK => {
                let expiry = Value::Timestamp(Utc::now() + LOCK_DURATION);
                let count = uuids(&body, fields::LOCK_TOKENS).len();
                ManagementOutcome::ok(single(fields::EXPIRATIONS, Value::List(vec![expiry; count])))
            }
            operations::RENEW_SESSION_LOCK => ManagementOutcome::ok(single(
                fields::EXPIRATION,
                Value::Timestamp(Utc::now() + LOCK_DURATION),
            )),
            operations::PEEK_MESSAGE => {
                let from = body.get(fields::FROM_SEQUENCE_NUMBER).and_then(Value::as_i64).unwrap_or(0);
                let count = body.get(fields::MESSAGE_COUNT).and_then(Value::as_i64).unwrap_or(1);
                let store = self.entity(address);
                let mut candidates: Vec<&Message> = store
                    .active
                    .iter()
                    .chain(store.deferred.values())
                    .filter(|m| m.sequence_number().unwrap_or_default() >= from)
                    .collect();
                candidates.sort_by_key(|m| m.sequence_number());
                let entries: Vec<Value> = candidates
                    .into_iter()
                    .take(usize::try_from(count).unwrap_or(0))
                    .filter_map(|m| m.encode().ok())
                    .map(|bytes| Value::Map(single(fields::MESSAGE, Value::Binary(bytes))))
                    .collect();
                messages_outcome(entries)
            }
            operations::RECEIVE_BY_SEQUENCE_NUMBER => {
                let settle_mode =
                    body.get(fields::RECEIVER_SETTLE_MODE).and_then(Value::as_i64).unwrap_or(0);
                let mut entries = Vec::new();
                for sequence in ints(&body, fields::SEQUENCE_NUMBERS) {
                    let Some(message) = self.entity(address).deferred.remove(&sequence) else {
                        continue;
                    };
                    let mut entry = BTreeMap::new();
                    let message = if settle_mode == i64::from(RECEIVER_SETTLE_MODE_SECOND) {
                        let (token, message) = self.lock_message(address, message);
                        entry.insert(fields::LOCK_TOKEN.to_string(), Value::Uuid(token));
                        message
                    } else {
                        message
                    };
                    if let Ok(bytes) = message.encode() {
                        entry.insert(fields::MESSAGE.to_string(), Value::Binary(bytes));
                        entries.push(Value::Map(entry));
                    }
                }
                messages_outcome(entries)
            }
            operations::SCHEDULE_MESSAGE => {
                let mut sequence_numbers = Vec::new();
                let entries = body.get(fields::MESSAGES).and_then(Value::as_list).unwrap_or_default();
                for entry in entries {
                    let decoded = entry
                        .as_map()
                        .and_then(|e| e.get(fields::MESSAGE))
                        .and_then(Value::as_binary)
                        .map(Message::decode);
                    let Some(Ok(mut message)) = decoded else {
                        return ManagementOutcome::error(400, "malformed message entry");
                    };
                    let sequence = self.assign_sequence(&mut message);
                    self.entity(address).scheduled.insert(sequence, message);
                    sequence_numbers.push(Value::Int(sequence));
                }
                ManagementOutcome::ok(single(fields::SEQUENCE_NUMBERS, Value::List(sequence_numbers)))
            }
            operations::CANCEL_SCHEDULED_MESSAGE => {
                for sequence in ints(&body, fields::SEQUENCE_NUMBERS) {
                    self.entity(address).scheduled.remove(&sequence);
                }
                ManagementOutcome::ok(BTreeMap::new())
            }
            operations::GET_SESSION_STATE => {
                let session_id = body.get(fields::SESSION_ID).and_then(Value::as_str).unwrap_or_default();
                let state = self
                    .session_states
                    .get(session_id)
                    .cloned()
                    .map_or(Value::Null, Value::Binary);
                ManagementOutcome::ok(single(fields::SESSION_STATE, state))
            }
            operations::SET_SESSION_STATE => {
                let session_id = body
                    .get(fields::SESSION_ID)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match body.get(fields::SESSION_STATE).and_then(Value::as_binary) {
                    Some(state) => {
                        self.session_states.insert(session_id, state.to_vec());
                    }
                    None => {
                        self.session_states.remove(&session_id);
                    }
                }
                ManagementOutcome::ok(BTreeMap::new())
            }
            _ => ManagementOutcome::ok(BTreeMap::new()),
        }
    }
}

struct ManagementOutcome {
    code: i64,
    description: String,
    body: BTreeMap<String, Value>,
}

impl ManagementOutcome {
    fn ok(body: BTreeMap<String, Value>) -> Self {
        Self { code: 200, description: "OK".to_string(), body }
    }

    fn error(code: i64, description: &str) -> Self {
        Self { code, description: description.to_string(), body: BTreeMap::new() }
    }
}

fn messages_outcome(entries: Vec<Value>) -> ManagementOutcome {
    if entries.is_empty() {
        return ManagementOutcome {
            code: STATUS_NO_CONTENT,
            description: "No messages".to_string(),
            body: BTreeMap::new(),
        };
    }
    ManagementOutcome::ok(single(fields::MESSAGES, Value::List(entries)))
}

fn single(key: &str, value: Value) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), value);
    map
}

fn uuids(body: &BTreeMap<String, Value>, field: &str) -> Vec<Uuid> {
    body.get(field)
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_uuid)
        .collect()
}

fn ints(body: &BTreeMap<String, Value>, field: &str) -> Vec<i64> {
    body.get(field)
        .and_then(Value::as_list)
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_i64)
        .collect()
}

fn entity_of_management(address: &str) -> &str {
    address.trim_end_matches(MANAGEMENT_SUFFIX).trim_end_matches('/')
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    // Lock order: a link's state may be locked before `state`, never the
    // other way round. `links` is only locked with neither held.
    links: Mutex<Vec<Arc<LinkShared>>>,
    notify: Notify,
}

/// In-memory broker shared by all fakes of one test.
#[derive(Clone)]
pub struct FakeBroker {
    inner: Arc<BrokerInner>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState {
                    max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
                    ..BrokerState::default()
                }),
                links: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    // Entity contents

    /// Enqueue a message on `address`, returning its sequence number.
    pub fn enqueue(&self, address: &str, mut message: Message) -> i64 {
        let sequence = {
            let mut state = self.inner.state.lock();
            let sequence = state.assign_sequence(&mut message);
            state.entity(address).active.push_back(message);
            sequence
        };
        self.inner.notify.notify_waiters();
        sequence
    }

    /// Store a message as already deferred, returning its sequence number.
    pub fn enqueue_deferred(&self, address: &str, mut message: Message) -> i64 {
        let mut state = self.inner.state.lock();
        let sequence = state.assign_sequence(&mut message);
        state.entity(address).deferred.insert(sequence, message);
        sequence
    }

    /// Messages waiting on `address`.
    pub fn active(&self, address: &str) -> Vec<Message> {
        self.inner.state.lock().entity(address).active.iter().cloned().collect()
    }

    pub fn deferred(&self, address: &str) -> Vec<Message> {
        self.inner.state.lock().entity(address).deferred.values().cloned().collect()
    }

    pub fn scheduled(&self, address: &str) -> Vec<Message> {
        self.inner.state.lock().entity(address).scheduled.values().cloned().collect()
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.inner.state.lock().settlements.clone()
    }

    pub fn management_requests(&self) -> Vec<Message> {
        self.inner.state.lock().management_requests.clone()
    }

    pub fn claims(&self) -> Vec<String> {
        self.inner.state.lock().claims.clone()
    }

    pub fn connections_opened(&self) -> u32 {
        self.inner.state.lock().connections_opened
    }

    pub fn sessions_opened(&self) -> u32 {
        self.inner.state.lock().sessions_opened
    }

    /// Open links attached to `address` (receivers by source, senders by
    /// target).
    pub fn open_links(&self, address: &str) -> usize {
        self.inner
            .links
            .lock()
            .iter()
            .filter(|link| link.address == address && link.is_open())
            .count()
    }

    pub fn set_max_message_size(&self, size: u64) {
        self.inner.state.lock().max_message_size = size;
    }

    // Failure injection

    pub fn fail_next_connect(&self, err: BusError) {
        self.inner.state.lock().connect_failures.push_back(err);
    }

    pub fn fail_next_attach(&self, err: BusError) {
        self.inner.state.lock().attach_failures.push_back(err);
    }

    pub fn fail_next_send(&self, err: BusError) {
        self.inner.state.lock().send_failures.push_back(err);
    }

    /// Fail the next settlement made on a data link.
    pub fn fail_next_settlement(&self, err: BusError) {
        self.inner.state.lock().settlement_failures.push_back(err);
    }

    pub fn fail_next_drain(&self, err: BusError) {
        self.inner.state.lock().drain_failures.push_back(err);
    }

    /// Make drains wait until their context finishes.
    pub fn hang_drains(&self, hang: bool) {
        self.inner.state.lock().drain_hangs = hang;
    }

    /// Answer the next management request with `code`.
    pub fn fail_next_management(&self, code: i64, description: &str) {
        self.inner.state.lock().management_failures.push_back((code, description.to_string()));
    }

    /// Record management requests without answering them.
    pub fn hold_management_responses(&self, hold: bool) {
        self.inner.state.lock().hold_management = hold;
    }

    /// Push an unsolicited 200 response to every open management receiver.
    pub fn inject_management_response(&self, correlation_id: Option<String>) {
        let mut response = response_message(correlation_id, 200, "OK", BTreeMap::new());
        response.delivery_tag = Some(Uuid::new_v4());
        for link in self.links_where(|link| link.is_receiver && link.is_management()) {
            link.push(response.clone());
        }
        self.inner.notify.notify_waiters();
    }

    /// Detach every management receiver with `err`.
    pub fn detach_management_receivers(&self, err: BusError) {
        for link in self.links_where(|link| link.is_receiver && link.is_management()) {
            link.close_with(err.clone());
        }
        self.inner.notify.notify_waiters();
    }

    /// Detach every link attached to `address` with `err`.
    pub fn detach_links(&self, address: &str, err: BusError) {
        for link in self.links_where(|link| link.address == address) {
            link.close_with(err.clone());
        }
        self.inner.notify.notify_waiters();
    }

    /// Drop every live connection; all of their links fail with
    /// `ConnectionClosed`.
    pub fn break_connections(&self) {
        self.inner.state.lock().live_connections.clear();
        for link in self.links_where(|_| true) {
            link.close_with(BusError::ConnectionClosed);
        }
        self.inner.notify.notify_waiters();
    }

    // Substrate internals

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.inner.notify.notified()
    }

    pub(crate) fn wake(&self) {
        self.inner.notify.notify_waiters();
    }

    pub(crate) fn open_connection(&self) -> BusResult<u64> {
        let mut state = self.inner.state.lock();
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        state.next_connection += 1;
        state.connections_opened += 1;
        let id = state.next_connection;
        state.live_connections.insert(id);
        Ok(id)
    }

    pub(crate) fn ensure_connection(&self, connection_id: u64) {
        let mut state = self.inner.state.lock();
        state.next_connection = state.next_connection.max(connection_id);
        state.live_connections.insert(connection_id);
    }

    pub(crate) fn close_connection(&self, connection_id: u64) {
        self.inner.state.lock().live_connections.remove(&connection_id);
        for link in self.links_where(|link| link.connection_id == connection_id) {
            link.close_with(BusError::ConnectionClosed);
        }
        self.inner.notify.notify_waiters();
    }

    pub(crate) fn open_session(&self, connection_id: u64) -> BusResult<()> {
        let mut state = self.inner.state.lock();
        if !state.live_connections.contains(&connection_id) {
            return Err(BusError::ConnectionClosed);
        }
        state.sessions_opened += 1;
        Ok(())
    }

    pub(crate) fn record_claim(&self, connection_id: u64, audience: &str) -> BusResult<()> {
        let mut state = self.inner.state.lock();
        if !state.live_connections.contains(&connection_id) {
            return Err(BusError::ConnectionClosed);
        }
        state.claims.push(audience.to_string());
        Ok(())
    }

    pub(crate) fn attach(&self, link: Arc<LinkShared>) -> BusResult<Arc<LinkShared>> {
        {
            let mut state = self.inner.state.lock();
            if !state.live_connections.contains(&link.connection_id) {
                return Err(BusError::ConnectionClosed);
            }
            if let Some(err) = state.attach_failures.pop_front() {
                return Err(err);
            }
        }
        let mut links = self.inner.links.lock();
        links.retain(|existing| existing.is_open());
        links.push(Arc::clone(&link));
        Ok(link)
    }

    pub(crate) fn max_message_size(&self) -> u64 {
        self.inner.state.lock().max_message_size
    }

    /// Accept a transfer from a sender attached to `address`.
    pub(crate) fn accept_transfer(&self, address: &str, mut message: Message) -> BusResult<()> {
        if address.ends_with(MANAGEMENT_SUFFIX) {
            return self.serve_management(address, message);
        }
        {
            let mut state = self.inner.state.lock();
            if let Some(err) = state.send_failures.pop_front() {
                return Err(err);
            }
            if message.encoded_len() > state.max_message_size {
                return Err(BusError::protocol(
                    busline_domain::constants::conditions::MESSAGE_SIZE_EXCEEDED,
                    "message too large",
                ));
            }
            state.assign_sequence(&mut message);
            state.entity(address).active.push_back(message);
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    fn serve_management(&self, address: &str, request: Message) -> BusResult<()> {
        let response = {
            let mut state = self.inner.state.lock();
            state.management_requests.push(request.clone());
            if state.hold_management {
                return Ok(());
            }
            let outcome = match state.management_failures.pop_front() {
                Some((code, description)) => ManagementOutcome::error(code, &description),
                None => state.serve(entity_of_management(address), &request),
            };
            response_message(
                request.properties.message_id.clone(),
                outcome.code,
                &outcome.description,
                outcome.body,
            )
        };

        let reply_to = request.properties.reply_to.clone();
        for link in self.links_where(|link| link.is_receiver && link.target == reply_to) {
            link.push(response.clone());
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    /// Hand the next message on `address` to a receiver.
    pub(crate) fn take_delivery(&self, address: &str, mode: ReceiveMode) -> Option<Message> {
        let mut state = self.inner.state.lock();
        let mut message = state.entity(address).active.pop_front()?;
        match mode {
            ReceiveMode::PeekLock => Some(state.lock_message(address, message).1),
            ReceiveMode::ReceiveAndDelete => {
                message.delivery_tag = Some(Uuid::new_v4());
                Some(message)
            }
        }
    }

    pub(crate) fn settle_on_link(
        &self,
        address: &str,
        status: DispositionStatus,
        message: &Message,
        dead_letter_reason: Option<String>,
    ) -> BusResult<()> {
        let mut state = self.inner.state.lock();
        if let Some(err) = state.settlement_failures.pop_front() {
            return Err(err);
        }
        let lock_token = message
            .delivery_tag
            .ok_or_else(|| BusError::invalid_input("message has no delivery tag"))?;
        state.settle(address, SettlementPath::DataLink, status, lock_token, dead_letter_reason);
        Ok(())
    }

    pub(crate) fn next_drain_failure(&self) -> Option<BusError> {
        self.inner.state.lock().drain_failures.pop_front()
    }

    pub(crate) fn drain_hangs(&self) -> bool {
        self.inner.state.lock().drain_hangs
    }

    fn links_where(&self, predicate: impl Fn(&LinkShared) -> bool) -> Vec<Arc<LinkShared>> {
        self.inner.links.lock().iter().filter(|link| predicate(link)).cloned().collect()
    }
}

fn response_message(
    correlation_id: Option<String>,
    code: i64,
    description: &str,
    body: BTreeMap<String, Value>,
) -> Message {
    let mut response = Message::request(BTreeMap::new(), Value::Map(body));
    response.properties.correlation_id = correlation_id;
    response
        .application_properties
        .insert(properties::STATUS_CODE.to_string(), Value::Int(code));
    response
        .application_properties
        .insert(properties::STATUS_DESCRIPTION.to_string(), Value::from(description));
    response
}
