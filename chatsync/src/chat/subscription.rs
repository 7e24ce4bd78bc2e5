//! Ownership of the realtime stream for one session.
//!
//! [`SubscriptionManager`] holds at most one live [`SubscriptionHandle`]
//! and the receiving end of the bounded queue its producer writes into.
//! Every arm creates a fresh queue, so a producer left over from an
//! earlier conversation can only write into a receiver nobody reads.

use tokio::sync::mpsc;

use chatsync_proto::message::ParticipantId;
use chatsync_proto::wire::RawRealtimeMessage;

use crate::transport::{RealtimeChannel, SubscriptionHandle, TransportError};

/// Holds the live realtime subscription, if any.
#[derive(Debug)]
pub struct SubscriptionManager {
    buffer: usize,
    handle: Option<SubscriptionHandle>,
    receiver: Option<mpsc::Receiver<Vec<RawRealtimeMessage>>>,
}

impl SubscriptionManager {
    /// Creates a disarmed manager whose queues hold `buffer` batches.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            handle: None,
            receiver: None,
        }
    }

    /// Replaces any current subscription with a new one for the given
    /// conversation.
    ///
    /// The previous handle is cancelled before the new subscription is
    /// requested. On failure the manager is left disarmed.
    ///
    /// # Errors
    ///
    /// Returns the channel's [`TransportError`] if it refuses the
    /// subscription.
    pub async fn arm<R: RealtimeChannel>(
        &mut self,
        channel: &R,
        local: &ParticipantId,
        counterpart: &ParticipantId,
    ) -> Result<(), TransportError> {
        self.disarm();
        let (tx, rx) = mpsc::channel(self.buffer);
        let handle = channel.subscribe(local, counterpart, tx).await?;
        tracing::debug!(local = %local, counterpart = %counterpart, "realtime armed");
        self.handle = Some(handle);
        self.receiver = Some(rx);
        Ok(())
    }

    /// Cancels the current subscription, if any. Safe to call repeatedly.
    pub fn disarm(&mut self) {
        self.receiver = None;
        if let Some(handle) = self.handle.take() {
            handle.cancel();
            tracing::debug!("realtime disarmed");
        }
    }

    /// Returns `true` while a subscription is live.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Waits for the next batch.
    ///
    /// Never resolves while disarmed. Resolves to `None` once the producer
    /// side has gone away.
    pub async fn next_batch(&mut self) -> Option<Vec<RawRealtimeMessage>> {
        match self.receiver.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Returns a batch that is already queued, without waiting.
    pub fn try_next_batch(&mut self) -> Option<Vec<RawRealtimeMessage>> {
        self.receiver.as_mut()?.try_recv().ok()
    }
}
