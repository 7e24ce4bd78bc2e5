//! Capability interfaces for the engine's external collaborators.
//!
//! Defines the traits the engine consumes but does not implement itself:
//! - [`IdentityResolver`]: maps an [`AuthContext`] to a participant id
//! - [`MessageTransport`]: retrieval, send and read-marking calls
//! - [`RealtimeChannel`]: push subscription for a conversation
//!
//! [`memory::InMemoryBackend`] implements all three over in-process state
//! for tests and the demo binary.

pub mod memory;

use std::fmt;

use tokio::sync::mpsc;

use chatsync_proto::message::ParticipantId;
use chatsync_proto::wire::{RawMessage, RawRealtimeMessage, SendRequest};

/// Credentials for the current user, passed explicitly into every operation.
///
/// An empty context (no token) means the caller is unauthenticated.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    token: Option<String>,
}

impl AuthContext {
    /// A context with no credentials.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self { token: None }
    }

    /// A context carrying a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// Returns the bearer token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Returns `true` if a non-blank token is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server answered with an error status.
    #[error("request failed with status {status}: {message}")]
    Status {
        /// HTTP-style status code.
        status: u16,
        /// Server-provided description.
        message: String,
    },

    /// The credentials were rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// Realtime delivery is not available for this conversation.
    #[error("realtime unavailable: {0}")]
    Unavailable(String),
}

/// Resolves the participant id behind a set of credentials.
pub trait IdentityResolver: Send + Sync {
    /// Returns the participant id for `auth`, or `None` if the credentials
    /// are valid but map to no participant.
    fn resolve(
        &self,
        auth: &AuthContext,
    ) -> impl std::future::Future<Output = Result<Option<ParticipantId>, TransportError>> + Send;
}

/// Request/response access to a two-party conversation.
pub trait MessageTransport: Send + Sync {
    /// Fetch up to `limit` of the most recent messages between `local`
    /// and `counterpart`. Order is unspecified; the engine sorts.
    fn fetch_recent(
        &self,
        local: &ParticipantId,
        counterpart: &ParticipantId,
        auth: &AuthContext,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<RawMessage>, TransportError>> + Send;

    /// Persist a message and return the authoritative stored record.
    fn send(
        &self,
        local: &ParticipantId,
        counterpart: &ParticipantId,
        request: SendRequest,
        auth: &AuthContext,
    ) -> impl std::future::Future<Output = Result<RawMessage, TransportError>> + Send;

    /// Mark every message not authored by `reader` as read.
    fn mark_read(
        &self,
        local: &ParticipantId,
        counterpart: &ParticipantId,
        reader: &ParticipantId,
        auth: &AuthContext,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}

/// Push delivery of conversation updates.
///
/// Implementations forward every batch into `sink` in delivery order
/// until the returned [`SubscriptionHandle`] is cancelled or dropped.
/// A closed `sink` means the consumer has gone away; implementations
/// should stop delivering to it.
pub trait RealtimeChannel: Send + Sync {
    /// Start a subscription for the conversation between `local` and
    /// `counterpart`.
    fn subscribe(
        &self,
        local: &ParticipantId,
        counterpart: &ParticipantId,
        sink: mpsc::Sender<Vec<RawRealtimeMessage>>,
    ) -> impl std::future::Future<Output = Result<SubscriptionHandle, TransportError>> + Send;
}

/// Ownership token for one realtime stream.
///
/// Cancelling (explicitly or by dropping) runs the producer's teardown
/// exactly once.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    /// Wraps a teardown callback.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Ties the subscription to a background task that is aborted on cancel.
    #[must_use]
    pub fn from_task(task: tokio::task::JoinHandle<()>) -> Self {
        Self::new(move || task.abort())
    }

    /// Cancels the subscription.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}
