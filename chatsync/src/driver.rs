//! Actor task that owns a [`ChatSession`].
//!
//! The session is not shared: one spawned task holds it and serializes
//! everything that touches it through a single `tokio::select!` loop:
//!
//! ```text
//! caller ─── SessionCommand ──→ ┐
//! realtime queue ─ batches ───→ ├─ session task ── SessionEvent ──→ caller
//! poll interval ── ticks ─────→ ┘
//! ```
//!
//! Polling reloads the timeline while the session is `Open`, using the
//! credentials of the most recent command that carried any. It keeps the
//! timeline correct when realtime is degraded or absent.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use chatsync_proto::message::{MediaRef, Message, ParticipantId};

use crate::chat::{ChatSession, ConversationMode, SessionError, SessionState};
use crate::filter::ContentFilter;
use crate::transport::{AuthContext, IdentityResolver, MessageTransport, RealtimeChannel};

/// Default capacity of the command channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 32;

/// Commands accepted by the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Open (or switch to) a conversation.
    Open {
        /// Caller credentials.
        auth: AuthContext,
        /// Conversation kind.
        mode: ConversationMode,
        /// The other participant.
        counterpart: ParticipantId,
        /// Display label for the counterpart.
        label: String,
    },
    /// Close the current conversation.
    Close,
    /// Reload the timeline now.
    Load {
        /// Caller credentials.
        auth: AuthContext,
    },
    /// Send a message and report the outcome.
    Send {
        /// Caller credentials.
        auth: AuthContext,
        /// Text body.
        content: String,
        /// Attached media.
        media: Vec<MediaRef>,
        /// Receives the stored message or the failure.
        reply: oneshot::Sender<Result<Message, SessionError>>,
    },
    /// Replace the draft text.
    SetDraft(String),
    /// Request a copy of the session's visible state.
    Snapshot(oneshot::Sender<SessionSnapshot>),
    /// Close the session and stop the task.
    Shutdown,
}

/// Point-in-time copy of what a renderer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Conversation kind.
    pub mode: ConversationMode,
    /// The other participant.
    pub counterpart_id: Option<ParticipantId>,
    /// Display label for the counterpart.
    pub counterpart_label: String,
    /// The timeline, oldest first.
    pub timeline: Vec<Message>,
    /// Draft text.
    pub pending_input: String,
    /// Whether realtime delivery is live.
    pub realtime: bool,
}

impl<I, T, R, F> From<&ChatSession<I, T, R, F>> for SessionSnapshot
where
    I: IdentityResolver,
    T: MessageTransport + 'static,
    R: RealtimeChannel,
    F: ContentFilter,
{
    fn from(session: &ChatSession<I, T, R, F>) -> Self {
        Self {
            state: session.state(),
            mode: session.mode(),
            counterpart_id: session.counterpart_id().cloned(),
            counterpart_label: session.counterpart_label().to_string(),
            timeline: session.timeline().to_vec(),
            pending_input: session.pending_input().to_string(),
            realtime: session.is_realtime_armed(),
        }
    }
}

/// Spawn the session task.
///
/// Returns the command sender and the task handle. The task ends after
/// [`SessionCommand::Shutdown`] or once every command sender is dropped;
/// either way the session is closed first.
pub fn spawn_session<I, T, R, F>(
    session: ChatSession<I, T, R, F>,
    command_buffer: usize,
) -> (mpsc::Sender<SessionCommand>, JoinHandle<()>)
where
    I: IdentityResolver + 'static,
    T: MessageTransport + 'static,
    R: RealtimeChannel + 'static,
    F: ContentFilter + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(command_buffer.max(1));
    let task = tokio::spawn(run(session, cmd_rx));
    (cmd_tx, task)
}

async fn run<I, T, R, F>(
    mut session: ChatSession<I, T, R, F>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
) where
    I: IdentityResolver,
    T: MessageTransport + 'static,
    R: RealtimeChannel,
    F: ContentFilter,
{
    let mut poll = session.config().poll_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.reset();
        interval
    });
    let mut last_auth: Option<AuthContext> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::debug!("command channel closed");
                    break;
                };
                if !handle_command(&mut session, cmd, &mut last_auth).await {
                    break;
                }
            }
            batch = session.next_realtime_batch() => {
                match batch {
                    Some(batch) => {
                        session.apply_realtime_batch(batch);
                    }
                    None => session.realtime_closed(),
                }
            }
            () = next_tick(&mut poll) => {
                let open = session.state() == SessionState::Open;
                if let Some(auth) = last_auth.as_ref().filter(|_| open) {
                    let outcome = session.load_messages(auth).await;
                    tracing::trace!(?outcome, "poll");
                }
            }
        }
    }

    session.close();
    tracing::info!("session task stopped");
}

/// Returns `false` when the loop should stop.
async fn handle_command<I, T, R, F>(
    session: &mut ChatSession<I, T, R, F>,
    cmd: SessionCommand,
    last_auth: &mut Option<AuthContext>,
) -> bool
where
    I: IdentityResolver,
    T: MessageTransport + 'static,
    R: RealtimeChannel,
    F: ContentFilter,
{
    match cmd {
        SessionCommand::Open {
            auth,
            mode,
            counterpart,
            label,
        } => {
            if session.open(&auth, mode, counterpart, label).await {
                *last_auth = Some(auth);
            }
        }
        SessionCommand::Close => session.close(),
        SessionCommand::Load { auth } => {
            session.load_messages(&auth).await;
            *last_auth = Some(auth);
        }
        SessionCommand::Send {
            auth,
            content,
            media,
            reply,
        } => {
            let result = session.send_message(&auth, content, media).await;
            if result.is_ok() {
                *last_auth = Some(auth);
            }
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
        SessionCommand::SetDraft(text) => session.set_pending_input(text),
        SessionCommand::Snapshot(reply) => {
            let _ = reply.send(SessionSnapshot::from(&*session));
        }
        SessionCommand::Shutdown => {
            tracing::info!("session task shutting down");
            return false;
        }
    }
    true
}

async fn next_tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
