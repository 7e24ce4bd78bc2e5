//! Send pipeline methods for [`ChatSession`].

use chatsync_proto::media::classify;
use chatsync_proto::message::{MediaRef, Message, OutgoingMessage, Timestamp};
use chatsync_proto::wire::SendRequest;

use crate::filter::ContentFilter;
use crate::transport::{AuthContext, IdentityResolver, MessageTransport, RealtimeChannel};

use super::{ChatSession, SessionError, SessionEvent, SessionState};

impl<I, T, R, F> ChatSession<I, T, R, F>
where
    I: IdentityResolver,
    T: MessageTransport + 'static,
    R: RealtimeChannel,
    F: ContentFilter,
{
    /// Send a message to the counterpart.
    ///
    /// Pipeline:
    /// 1. Validate (content or media present, content within the size limit)
    /// 2. Resolve the local participant
    /// 3. Classify the media into a message type
    /// 4. Transmit via [`MessageTransport::send`]
    /// 5. Ingest the stored record and merge it into the timeline
    ///
    /// The draft is cleared only on success. Every failure is logged and
    /// reported as [`SessionEvent::SendFailed`]. The stored record is
    /// returned even when the content filter keeps it out of the timeline.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotOpen`] unless the session is `Open`, and
    /// the failing step's error otherwise.
    pub async fn send_message(
        &mut self,
        auth: &AuthContext,
        content: impl Into<String>,
        media: Vec<MediaRef>,
    ) -> Result<Message, SessionError> {
        let outgoing = OutgoingMessage::new(content, media);
        match self.send_outgoing(auth, outgoing).await {
            Ok(message) => {
                self.pending_input.clear();
                Ok(message)
            }
            Err(e) => {
                tracing::warn!(error = %e, "send failed");
                self.emit(SessionEvent::SendFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn send_outgoing(
        &mut self,
        auth: &AuthContext,
        outgoing: OutgoingMessage,
    ) -> Result<Message, SessionError> {
        if self.state != SessionState::Open {
            return Err(SessionError::NotOpen);
        }
        let (Some(counterpart), Some(sender_type)) =
            (self.counterpart_id.clone(), self.mode.local_sender_type())
        else {
            return Err(SessionError::NotOpen);
        };

        outgoing.validate(self.config.max_content_len)?;
        let local = self.resolve_local(auth).await?;

        let message_type = classify(&outgoing.media);
        let request = SendRequest::new(&local, sender_type, &outgoing, message_type);

        self.sending = true;
        let sent = self.transport.send(&local, &counterpart, request, auth).await;
        self.sending = false;
        let record = sent?;

        let message = record
            .into_message(&local, Timestamp::now())
            .map_err(SessionError::InvalidResponse)?;
        tracing::debug!(
            counterpart = %counterpart,
            id = %message.id,
            message_type = %message.message_type,
            "message sent"
        );
        if self.commit(vec![message.clone()]) == 0 {
            tracing::debug!(id = %message.id, "sent message withheld by content filter");
        }
        Ok(message)
    }
}
