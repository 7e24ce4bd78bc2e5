//! In-memory backend for tests and the demo binary.
//!
//! [`InMemoryBackend`] plays all three external roles at once: it resolves
//! identities from registered tokens, stores conversations, and pushes
//! every mutation (sends, injected remote messages, read flips) to live
//! realtime subscribers. Clones share the same state, so one backend can
//! be handed to a session as resolver, transport and channel.
//!
//! Each operation can be made to fail on demand via [`InMemoryBackend::fail`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use chatsync_proto::codec::{self, CodecError};
use chatsync_proto::message::{ParticipantId, Timestamp};
use chatsync_proto::wire::{RawMessage, RawRealtimeMessage, RawTimestamp, SendRequest};

use super::{
    AuthContext, IdentityResolver, MessageTransport, RealtimeChannel, SubscriptionHandle,
    TransportError,
};

/// Operations whose failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`IdentityResolver::resolve`].
    Identity,
    /// [`MessageTransport::fetch_recent`].
    Fetch,
    /// [`MessageTransport::send`].
    Send,
    /// [`MessageTransport::mark_read`].
    MarkRead,
    /// [`RealtimeChannel::subscribe`].
    Subscribe,
}

/// Unordered participant pair identifying a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConversationKey(String, String);

impl ConversationKey {
    fn new(a: &ParticipantId, b: &ParticipantId) -> Self {
        let (a, b) = (a.as_str(), b.as_str());
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }
}

/// A live realtime consumer.
struct Subscriber {
    id: u64,
    key: ConversationKey,
    sink: mpsc::Sender<Vec<RawRealtimeMessage>>,
}

#[derive(Default)]
struct BackendState {
    identities: HashMap<String, ParticipantId>,
    conversations: HashMap<ConversationKey, Vec<RawMessage>>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    failing: Vec<Operation>,
    mark_read_calls: usize,
    last_timestamp: u64,
}

impl BackendState {
    fn check(&self, op: Operation) -> Result<(), TransportError> {
        if !self.failing.contains(&op) {
            return Ok(());
        }
        let message = format!("injected {op:?} failure");
        Err(match op {
            Operation::Subscribe => TransportError::Unavailable(message),
            _ => TransportError::Status {
                status: 503,
                message,
            },
        })
    }

    /// Returns a strictly increasing creation instant.
    fn next_timestamp(&mut self) -> Timestamp {
        let now = Timestamp::now().as_millis().max(self.last_timestamp + 1);
        self.last_timestamp = now;
        Timestamp::from_millis(now)
    }

    fn push(&mut self, key: &ConversationKey, batch: &[RawRealtimeMessage]) {
        if batch.is_empty() {
            return;
        }
        self.subscribers.retain(|sub| !sub.sink.is_closed());
        for sub in self.subscribers.iter().filter(|s| &s.key == key) {
            if let Err(e) = sub.sink.try_send(batch.to_vec()) {
                tracing::warn!(subscriber = sub.id, error = %e, "dropping realtime batch");
            }
        }
    }
}

/// Shared in-process backend. See the module docs.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl InMemoryBackend {
    /// Creates an empty backend with no identities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` as belonging to `participant`.
    #[must_use]
    pub fn with_identity(self, token: impl Into<String>, participant: ParticipantId) -> Self {
        self.state.lock().identities.insert(token.into(), participant);
        self
    }

    /// Turns injected failure of `op` on or off.
    pub fn fail(&self, op: Operation, enabled: bool) {
        let mut state = self.state.lock();
        state.failing.retain(|o| *o != op);
        if enabled {
            state.failing.push(op);
        }
    }

    /// Stores records without notifying subscribers.
    pub fn seed(&self, a: &ParticipantId, b: &ParticipantId, records: Vec<RawMessage>) {
        let key = ConversationKey::new(a, b);
        self.state
            .lock()
            .conversations
            .entry(key)
            .or_default()
            .extend(records);
    }

    /// Decodes a JSON retrieval page and stores it via [`seed`](Self::seed).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the bytes are not a valid page.
    pub fn seed_json(
        &self,
        a: &ParticipantId,
        b: &ParticipantId,
        bytes: &[u8],
    ) -> Result<usize, CodecError> {
        let records = codec::decode_page(bytes)?;
        let count = records.len();
        self.seed(a, b, records);
        Ok(count)
    }

    /// Stores a record arriving from another client and pushes it to
    /// subscribers. Missing ids and timestamps are assigned.
    pub fn inject(&self, a: &ParticipantId, b: &ParticipantId, mut record: RawMessage) -> RawMessage {
        let key = ConversationKey::new(a, b);
        let mut state = self.state.lock();
        if record.id.is_none() {
            record.id = Some(Uuid::now_v7().to_string());
        }
        if record.created_at.is_none() {
            record.created_at = Some(RawTimestamp::from(state.next_timestamp()));
        }
        state
            .conversations
            .entry(key.clone())
            .or_default()
            .push(record.clone());
        state.push(&key, &[RawRealtimeMessage::from(record.clone())]);
        record
    }

    /// Pushes a batch to subscribers without storing it.
    pub fn push_realtime(
        &self,
        a: &ParticipantId,
        b: &ParticipantId,
        batch: Vec<RawRealtimeMessage>,
    ) {
        let key = ConversationKey::new(a, b);
        self.state.lock().push(&key, &batch);
    }

    /// Returns every stored record of a conversation in insertion order.
    #[must_use]
    pub fn messages(&self, a: &ParticipantId, b: &ParticipantId) -> Vec<RawMessage> {
        let key = ConversationKey::new(a, b);
        self.state
            .lock()
            .conversations
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of subscriptions that have not been cancelled.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|sub| !sub.sink.is_closed());
        state.subscribers.len()
    }

    /// Number of successful `mark_read` calls so far.
    #[must_use]
    pub fn mark_read_calls(&self) -> usize {
        self.state.lock().mark_read_calls
    }

    fn mark_read_now(&self, a: &ParticipantId, b: &ParticipantId, reader: &ParticipantId) {
        let key = ConversationKey::new(a, b);
        let mut state = self.state.lock();
        let flipped: Vec<RawRealtimeMessage> = state
            .conversations
            .get_mut(&key)
            .map(|records| {
                records
                    .iter_mut()
                    .filter(|r| r.sender_id != reader.as_str() && r.is_read != Some(true))
                    .map(|r| {
                        r.is_read = Some(true);
                        RawRealtimeMessage::from(r.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();
        tracing::debug!(reader = %reader, flipped = flipped.len(), "marked messages read");
        state.push(&key, &flipped);
    }

    /// Marks messages not authored by `reader` as read, outside of any
    /// session. Used to simulate the counterpart reading.
    pub fn read_by(&self, a: &ParticipantId, b: &ParticipantId, reader: &ParticipantId) {
        self.mark_read_now(a, b, reader);
    }
}

impl IdentityResolver for InMemoryBackend {
    async fn resolve(&self, auth: &AuthContext) -> Result<Option<ParticipantId>, TransportError> {
        let state = self.state.lock();
        state.check(Operation::Identity)?;
        Ok(auth
            .token()
            .and_then(|token| state.identities.get(token))
            .cloned())
    }
}

impl MessageTransport for InMemoryBackend {
    async fn fetch_recent(
        &self,
        local: &ParticipantId,
        counterpart: &ParticipantId,
        auth: &AuthContext,
        limit: usize,
    ) -> Result<Vec<RawMessage>, TransportError> {
        if !auth.is_authenticated() {
            return Err(TransportError::Unauthorized);
        }
        let state = self.state.lock();
        state.check(Operation::Fetch)?;
        let key = ConversationKey::new(local, counterpart);
        // Newest first, like a paginated API.
        Ok(state
            .conversations
            .get(&key)
            .map(|records| records.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send(
        &self,
        local: &ParticipantId,
        counterpart: &ParticipantId,
        request: SendRequest,
        auth: &AuthContext,
    ) -> Result<RawMessage, TransportError> {
        if !auth.is_authenticated() {
            return Err(TransportError::Unauthorized);
        }
        let key = ConversationKey::new(local, counterpart);
        let mut state = self.state.lock();
        state.check(Operation::Send)?;
        let created_at = state.next_timestamp();
        let record = RawMessage::from_request(request, Uuid::now_v7().to_string(), created_at);
        state
            .conversations
            .entry(key.clone())
            .or_default()
            .push(record.clone());
        state.push(&key, &[RawRealtimeMessage::from(record.clone())]);
        Ok(record)
    }

    async fn mark_read(
        &self,
        local: &ParticipantId,
        counterpart: &ParticipantId,
        reader: &ParticipantId,
        auth: &AuthContext,
    ) -> Result<(), TransportError> {
        if !auth.is_authenticated() {
            return Err(TransportError::Unauthorized);
        }
        {
            let mut state = self.state.lock();
            state.check(Operation::MarkRead)?;
            state.mark_read_calls += 1;
        }
        self.mark_read_now(local, counterpart, reader);
        Ok(())
    }
}

impl RealtimeChannel for InMemoryBackend {
    async fn subscribe(
        &self,
        local: &ParticipantId,
        counterpart: &ParticipantId,
        sink: mpsc::Sender<Vec<RawRealtimeMessage>>,
    ) -> Result<SubscriptionHandle, TransportError> {
        let mut state = self.state.lock();
        state.check(Operation::Subscribe)?;
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push(Subscriber {
            id,
            key: ConversationKey::new(local, counterpart),
            sink,
        });
        tracing::debug!(subscriber = id, local = %local, counterpart = %counterpart, "subscribed");

        let shared = Arc::clone(&self.state);
        Ok(SubscriptionHandle::new(move || {
            shared.lock().subscribers.retain(|sub| sub.id != id);
            tracing::debug!(subscriber = id, "unsubscribed");
        }))
    }
}
