//! Conversation session: lifecycle, loading and realtime ingestion.
//!
//! [`ChatSession`] owns one conversation timeline at a time. It composes
//! the external collaborators (identity, transport, realtime, filter) with
//! the [`merge`](crate::merge) core and the [`SubscriptionManager`].
//!
//! Every batch, whatever its source, flows through the same path:
//! validate ([`ingest::validate_batch`]) -> filter -> merge. The send
//! pipeline lives in [`send`].
//!
//! Methods take `&mut self`; the session is meant to be driven from a
//! single task (see [`crate::driver`]).

pub mod ingest;
pub mod send;
pub mod subscription;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use chatsync_proto::message::{MAX_CONTENT_LEN, Message, ParticipantId, Role, ValidationError};
use chatsync_proto::wire::{IngestError, RawMessage, RawRealtimeMessage, SenderType};

use crate::filter::ContentFilter;
use crate::merge::merge_into;
use crate::transport::{
    AuthContext, IdentityResolver, MessageTransport, RealtimeChannel, TransportError,
};

use ingest::Source;
use subscription::SubscriptionManager;

/// Default number of messages fetched per load.
pub const DEFAULT_FETCH_LIMIT: usize = 100;

/// Default capacity of the realtime queue, in batches.
pub const DEFAULT_REALTIME_BUFFER: usize = 64;

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No conversation is open.
    #[default]
    Closed,
    /// A conversation is being opened; the initial load is running.
    Opening,
    /// A conversation is open.
    Open,
}

/// Kind of conversation a session holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationMode {
    /// No conversation.
    #[default]
    None,
    /// A shopper talking to a store.
    StoreConversation,
}

impl ConversationMode {
    /// Side of the conversation the local participant sends as.
    #[must_use]
    pub const fn local_sender_type(self) -> Option<SenderType> {
        match self {
            Self::None => None,
            Self::StoreConversation => Some(SenderType::Customer),
        }
    }
}

/// Tunables for a [`ChatSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum number of messages requested per load.
    pub fetch_limit: usize,
    /// Run the initial load as part of `open`.
    pub load_on_open: bool,
    /// Arm the realtime subscription on open.
    pub realtime: bool,
    /// Capacity of the realtime queue, in batches.
    pub realtime_buffer: usize,
    /// Polling period used by the driver. `None` disables polling.
    pub poll_interval: Option<Duration>,
    /// Maximum outgoing content length in bytes.
    pub max_content_len: usize,
    /// Capacity of the [`SessionEvent`] channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            load_on_open: true,
            realtime: true,
            realtime_buffer: DEFAULT_REALTIME_BUFFER,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
            max_content_len: MAX_CONTENT_LEN,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The operation requires an open session.
    #[error("session is not open")]
    NotOpen,

    /// No credentials were supplied.
    #[error("not authenticated")]
    Unauthenticated,

    /// Credentials were present but did not resolve to a participant.
    #[error("identity resolution failed: {0}")]
    IdentityResolutionFailed(String),

    /// The outgoing message is invalid.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// The transport call failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The backend answered a send with a record that cannot be ingested.
    #[error("invalid send response: {0}")]
    InvalidResponse(IngestError),
}

/// Result of [`ChatSession::load_messages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The session was not in a loadable state.
    Skipped,
    /// The local participant could not be determined.
    Aborted(SessionError),
    /// The fetch failed; the timeline is unchanged.
    Failed(SessionError),
    /// The page was fetched and merged.
    Loaded {
        /// Records returned by the transport.
        fetched: usize,
        /// Messages that passed validation and filtering.
        accepted: usize,
    },
}

/// Notifications for whoever renders the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged(SessionState),
    /// The timeline changed.
    TimelineUpdated {
        /// Timeline length after the merge.
        len: usize,
        /// Messages that were new to the timeline.
        added: usize,
    },
    /// A send failed; the draft was kept.
    SendFailed(String),
    /// Realtime delivery is unavailable; updates arrive by polling only.
    RealtimeDegraded(String),
}

/// A single conversation session.
///
/// Created `Closed`. See the module docs for the data flow.
pub struct ChatSession<I, T, R, F>
where
    I: IdentityResolver,
    T: MessageTransport + 'static,
    R: RealtimeChannel,
    F: ContentFilter,
{
    identity: I,
    transport: Arc<T>,
    realtime: R,
    filter: F,
    config: SessionConfig,
    state: SessionState,
    mode: ConversationMode,
    counterpart_id: Option<ParticipantId>,
    counterpart_label: String,
    /// Resolved on the first authenticated operation after open.
    local_id: Option<ParticipantId>,
    timeline: Vec<Message>,
    pending_input: String,
    loading: bool,
    sending: bool,
    subscription: SubscriptionManager,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl<I, T, R, F> ChatSession<I, T, R, F>
where
    I: IdentityResolver,
    T: MessageTransport + 'static,
    R: RealtimeChannel,
    F: ContentFilter,
{
    /// Creates a closed session.
    ///
    /// Returns the session and a receiver for its [`SessionEvent`]s.
    /// Events are dropped when the receiver falls behind.
    pub fn new(
        identity: I,
        transport: T,
        realtime: R,
        filter: F,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let session = Self {
            identity,
            transport: Arc::new(transport),
            realtime,
            filter,
            subscription: SubscriptionManager::new(config.realtime_buffer),
            config,
            state: SessionState::Closed,
            mode: ConversationMode::None,
            counterpart_id: None,
            counterpart_label: String::new(),
            local_id: None,
            timeline: Vec::new(),
            pending_input: String::new(),
            loading: false,
            sending: false,
            event_tx,
        };
        (session, event_rx)
    }

    /// Opens a conversation with `counterpart`.
    ///
    /// Returns `false` without touching any state when `auth` carries no
    /// credentials, `mode` is [`ConversationMode::None`], or the
    /// counterpart id is blank. An already open conversation is closed
    /// first. Load and subscription failures do not fail the open: the
    /// session still ends up `Open`.
    pub async fn open(
        &mut self,
        auth: &AuthContext,
        mode: ConversationMode,
        counterpart: ParticipantId,
        label: impl Into<String>,
    ) -> bool {
        if !auth.is_authenticated() {
            tracing::info!(counterpart = %counterpart, "open rejected: not authenticated");
            return false;
        }
        if mode == ConversationMode::None {
            tracing::warn!(counterpart = %counterpart, "open rejected: no conversation mode");
            return false;
        }
        if counterpart.as_str().trim().is_empty() {
            tracing::warn!("open rejected: blank counterpart");
            return false;
        }

        if self.state != SessionState::Closed {
            self.close();
        }

        self.timeline.clear();
        self.mode = mode;
        self.counterpart_label = label.into();
        tracing::info!(counterpart = %counterpart, label = %self.counterpart_label, "opening conversation");
        self.counterpart_id = Some(counterpart);
        self.set_state(SessionState::Opening);

        if self.config.load_on_open {
            let outcome = self.load_messages(auth).await;
            tracing::debug!(?outcome, "initial load finished");
        }

        self.set_state(SessionState::Open);

        if self.config.realtime {
            self.arm_realtime(auth).await;
        }
        true
    }

    /// Closes the conversation: cancels the subscription and clears the
    /// timeline, draft and identifiers. Idempotent.
    pub fn close(&mut self) {
        self.subscription.disarm();
        self.timeline.clear();
        self.pending_input.clear();
        self.counterpart_id = None;
        self.counterpart_label.clear();
        self.local_id = None;
        self.mode = ConversationMode::None;
        self.loading = false;
        self.sending = false;
        if self.state != SessionState::Closed {
            tracing::info!("conversation closed");
            self.set_state(SessionState::Closed);
        }
    }

    /// Fetches the most recent page and merges it into the timeline.
    ///
    /// Afterwards, if the counterpart has unread messages, a best-effort
    /// `mark_read` is issued in the background.
    pub async fn load_messages(&mut self, auth: &AuthContext) -> LoadOutcome {
        if !self.is_active() {
            return LoadOutcome::Skipped;
        }
        let Some(counterpart) = self.counterpart_id.clone() else {
            return LoadOutcome::Skipped;
        };

        let local = match self.resolve_local(auth).await {
            Ok(local) => local,
            Err(e) => {
                tracing::warn!(counterpart = %counterpart, error = %e, "load aborted");
                return LoadOutcome::Aborted(e);
            }
        };

        self.loading = true;
        let fetched = self
            .transport
            .fetch_recent(&local, &counterpart, auth, self.config.fetch_limit)
            .await;
        self.loading = false;

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(counterpart = %counterpart, error = %e, "load failed");
                return LoadOutcome::Failed(e.into());
            }
        };

        let fetched = records.len();
        let accepted = self.absorb(records, Source::Retrieval);
        tracing::debug!(counterpart = %counterpart, fetched, accepted, "loaded messages");

        self.request_mark_read(auth, local, counterpart);
        LoadOutcome::Loaded { fetched, accepted }
    }

    /// Ingests a realtime batch through the same path as retrieval.
    ///
    /// Ignored unless the session is `Opening` or `Open`. Returns the
    /// number of messages that reached the merge.
    pub fn apply_realtime_batch(&mut self, batch: Vec<RawRealtimeMessage>) -> usize {
        if !self.is_active() {
            tracing::debug!(size = batch.len(), "ignoring realtime batch: session not open");
            return 0;
        }
        let records = batch.into_iter().map(RawMessage::from).collect();
        self.absorb(records, Source::Realtime)
    }

    /// Waits for the next realtime batch. Never resolves while no
    /// subscription is armed.
    pub async fn next_realtime_batch(&mut self) -> Option<Vec<RawRealtimeMessage>> {
        self.subscription.next_batch().await
    }

    /// Applies every realtime batch already queued. Returns the number of
    /// batches applied.
    pub fn drain_realtime(&mut self) -> usize {
        let mut applied = 0;
        while let Some(batch) = self.subscription.try_next_batch() {
            self.apply_realtime_batch(batch);
            applied += 1;
        }
        applied
    }

    /// Called when the realtime producer has gone away. Drops the
    /// subscription; the session keeps working by polling.
    pub fn realtime_closed(&mut self) {
        if !self.subscription.is_armed() {
            return;
        }
        self.subscription.disarm();
        tracing::warn!("realtime stream ended, falling back to polling");
        self.emit(SessionEvent::RealtimeDegraded("stream ended".to_string()));
    }

    /// Replaces the draft text.
    pub fn set_pending_input(&mut self, text: impl Into<String>) {
        self.pending_input = text.into();
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Current conversation mode.
    #[must_use]
    pub const fn mode(&self) -> ConversationMode {
        self.mode
    }

    /// Counterpart of the open conversation.
    #[must_use]
    pub const fn counterpart_id(&self) -> Option<&ParticipantId> {
        self.counterpart_id.as_ref()
    }

    /// Display label of the counterpart.
    #[must_use]
    pub fn counterpart_label(&self) -> &str {
        &self.counterpart_label
    }

    /// Local participant, once resolved.
    #[must_use]
    pub const fn local_id(&self) -> Option<&ParticipantId> {
        self.local_id.as_ref()
    }

    /// The ordered, deduplicated timeline.
    #[must_use]
    pub fn timeline(&self) -> &[Message] {
        &self.timeline
    }

    /// Draft text.
    #[must_use]
    pub fn pending_input(&self) -> &str {
        &self.pending_input
    }

    /// `true` while a fetch is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// `true` while a send is in flight.
    #[must_use]
    pub const fn is_sending(&self) -> bool {
        self.sending
    }

    /// `true` while a realtime subscription is live.
    #[must_use]
    pub const fn is_realtime_armed(&self) -> bool {
        self.subscription.is_armed()
    }

    /// Session tunables.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    const fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Opening | SessionState::Open)
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::trace!(error = %e, "session event dropped");
        }
    }

    async fn resolve_local(&mut self, auth: &AuthContext) -> Result<ParticipantId, SessionError> {
        if !auth.is_authenticated() {
            return Err(SessionError::Unauthenticated);
        }
        match self.identity.resolve(auth).await {
            Ok(Some(local)) => {
                self.local_id = Some(local.clone());
                Ok(local)
            }
            Ok(None) => Err(SessionError::IdentityResolutionFailed(
                "credentials map to no participant".to_string(),
            )),
            Err(e) => Err(SessionError::IdentityResolutionFailed(e.to_string())),
        }
    }

    async fn arm_realtime(&mut self, auth: &AuthContext) {
        let Some(counterpart) = self.counterpart_id.clone() else {
            return;
        };
        let local = match self.local_id.clone() {
            Some(local) => local,
            None => match self.resolve_local(auth).await {
                Ok(local) => local,
                Err(e) => {
                    tracing::warn!(error = %e, "realtime not armed, polling only");
                    self.emit(SessionEvent::RealtimeDegraded(e.to_string()));
                    return;
                }
            },
        };
        if let Err(e) = self
            .subscription
            .arm(&self.realtime, &local, &counterpart)
            .await
        {
            tracing::warn!(counterpart = %counterpart, error = %e, "subscribe failed, polling only");
            self.emit(SessionEvent::RealtimeDegraded(e.to_string()));
        }
    }

    /// Validates raw records and commits the survivors.
    fn absorb(&mut self, records: Vec<RawMessage>, source: Source) -> usize {
        let Some(local) = self.local_id.as_ref() else {
            tracing::debug!(%source, "dropping batch: local participant unknown");
            return 0;
        };
        let messages = ingest::validate_batch(records, local, source);
        self.commit(messages)
    }

    /// Filters and merges canonical messages into the timeline.
    fn commit(&mut self, messages: Vec<Message>) -> usize {
        let messages = self.filter.filter(messages);
        let accepted = messages.len();
        if accepted == 0 {
            return 0;
        }
        let added = merge_into(&mut self.timeline, messages);
        self.emit(SessionEvent::TimelineUpdated {
            len: self.timeline.len(),
            added,
        });
        accepted
    }

    fn request_mark_read(&self, auth: &AuthContext, local: ParticipantId, counterpart: ParticipantId) {
        let has_unread = self
            .timeline
            .iter()
            .any(|m| m.role == Role::Remote && !m.read);
        if !has_unread {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let auth = auth.clone();
        tokio::spawn(async move {
            if let Err(e) = transport
                .mark_read(&local, &counterpart, &local, &auth)
                .await
            {
                tracing::warn!(counterpart = %counterpart, error = %e, "mark_read failed");
            }
        });
    }
}
