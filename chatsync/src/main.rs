//! `chatsync`: interactive demo of the conversation sync engine.
//!
//! Opens a store conversation against the in-memory backend and reads
//! commands from stdin. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/chatsync/config.toml`).
//!
//! ```bash
//! cargo run --bin chatsync -- --counterpart store-1 --label "Corner Shop"
//!
//! # Start from a saved retrieval page, polling only
//! cargo run --bin chatsync -- --seed-file page.json --no-realtime
//! ```
//!
//! Commands:
//! - `<text>` sends a message
//! - `/media <url> [url...]` sends media without text
//! - `/remote <text>` simulates the store writing
//! - `/read` simulates the store reading your messages
//! - `/draft <text>` sets the draft
//! - `/reload`, `/close`, `/open`, `/quit`

use std::io;
use std::path::Path;

use chrono::{DateTime, Local};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing_appender::non_blocking::WorkerGuard;

use chatsync::chat::{ChatSession, ConversationMode, SessionEvent};
use chatsync::config::{CliArgs, ClientConfig};
use chatsync::driver::{self, SessionCommand, SessionSnapshot};
use chatsync::filter::PassThrough;
use chatsync::message::{MediaRef, ParticipantId, Role};
use chatsync::transport::AuthContext;
use chatsync::transport::memory::InMemoryBackend;
use chatsync::wire::{RawMessage, SenderType};

const DEFAULT_PARTICIPANT: &str = "customer-demo";
const DEFAULT_TOKEN: &str = "demo-token";
const DEFAULT_COUNTERPART: &str = "store-demo";

/// Everything the stdin loop needs to act on a line.
struct Demo {
    backend: InMemoryBackend,
    commands: mpsc::Sender<SessionCommand>,
    auth: AuthContext,
    local: ParticipantId,
    counterpart: ParticipantId,
    label: String,
    timestamp_format: String,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("chatsync starting");

    let local = ParticipantId::new(
        config
            .participant_id
            .clone()
            .unwrap_or_else(|| DEFAULT_PARTICIPANT.to_string()),
    );
    let token = config
        .auth_token
        .clone()
        .unwrap_or_else(|| DEFAULT_TOKEN.to_string());
    let counterpart = ParticipantId::new(
        config
            .counterpart_id
            .clone()
            .unwrap_or_else(|| DEFAULT_COUNTERPART.to_string()),
    );
    let label = config
        .counterpart_label
        .clone()
        .unwrap_or_else(|| counterpart.to_string());

    let backend = InMemoryBackend::new().with_identity(token.clone(), local.clone());
    if let Some(path) = config.seed_file.as_deref() {
        seed_backend(&backend, &local, &counterpart, path);
    }

    let (session, mut events) = ChatSession::new(
        backend.clone(),
        backend.clone(),
        backend.clone(),
        PassThrough,
        config.to_session_config(),
    );
    let (commands, task) = driver::spawn_session(session, driver::DEFAULT_COMMAND_BUFFER);

    let demo = Demo {
        backend,
        commands,
        auth: AuthContext::bearer(token),
        local,
        counterpart,
        label,
        timestamp_format: config.timestamp_format.clone(),
    };
    demo.open().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !demo.handle_line(line.trim()).await {
                    break;
                }
            }
            Some(event) = events.recv() => demo.on_event(event).await,
        }
    }

    let _ = demo.commands.send(SessionCommand::Shutdown).await;
    if let Err(e) = task.await {
        tracing::error!(error = %e, "session task failed");
    }
    tracing::info!("chatsync exiting");
    Ok(())
}

/// Initialize logging.
///
/// Logs go to stderr, or to `file_path` through a non-blocking writer.
/// The returned [`WorkerGuard`] must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env("CHATSYNC_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = match log_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn seed_backend(backend: &InMemoryBackend, local: &ParticipantId, counterpart: &ParticipantId, path: &Path) {
    let seeded = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| {
            backend
                .seed_json(local, counterpart, &bytes)
                .map_err(|e| e.to_string())
        });
    match seeded {
        Ok(count) => tracing::info!(path = %path.display(), count, "seeded conversation"),
        Err(e) => eprintln!("Warning: could not seed from {}: {e}", path.display()),
    }
}

impl Demo {
    async fn open(&self) {
        self.command(SessionCommand::Open {
            auth: self.auth.clone(),
            mode: ConversationMode::StoreConversation,
            counterpart: self.counterpart.clone(),
            label: self.label.clone(),
        })
        .await;
    }

    /// Returns `false` when the user asked to quit.
    async fn handle_line(&self, line: &str) -> bool {
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        match cmd {
            "" => {}
            "/quit" => return false,
            "/reload" => {
                self.command(SessionCommand::Load {
                    auth: self.auth.clone(),
                })
                .await;
            }
            "/close" => self.command(SessionCommand::Close).await,
            "/open" => self.open().await,
            "/draft" => self.command(SessionCommand::SetDraft(rest.to_string())).await,
            "/remote" => {
                self.backend
                    .inject(&self.counterpart, &self.local, self.remote_record(rest));
            }
            "/read" => self
                .backend
                .read_by(&self.local, &self.counterpart, &self.counterpart),
            "/media" => {
                let media = rest.split_whitespace().map(MediaRef::new).collect();
                self.send(String::new(), media).await;
            }
            _ if cmd.starts_with('/') => println!("unknown command: {cmd}"),
            _ => self.send(line.to_string(), Vec::new()).await,
        }
        true
    }

    async fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => println!("-- session {state:?}"),
            SessionEvent::TimelineUpdated { .. } => {
                if let Some(snapshot) = self.snapshot().await {
                    self.render(&snapshot);
                }
            }
            SessionEvent::SendFailed(reason) => println!("!! send failed: {reason}"),
            SessionEvent::RealtimeDegraded(reason) => {
                println!("!! realtime unavailable ({reason}), polling");
            }
        }
    }

    async fn send(&self, content: String, media: Vec<MediaRef>) {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Send {
            auth: self.auth.clone(),
            content,
            media,
            reply,
        })
        .await;
        if let Ok(Err(e)) = rx.await {
            tracing::debug!(error = %e, "send rejected");
        }
    }

    async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Snapshot(reply)).await;
        rx.await.ok()
    }

    async fn command(&self, cmd: SessionCommand) {
        if let Err(e) = self.commands.send(cmd).await {
            tracing::warn!(error = %e, "session task is gone");
        }
    }

    fn remote_record(&self, text: &str) -> RawMessage {
        RawMessage {
            id: None,
            sender_id: self.counterpart.to_string(),
            sender_type: SenderType::Store,
            content: Some(text.to_string()),
            message_type: None,
            media_url: None,
            created_at: None,
            is_read: Some(false),
        }
    }

    fn render(&self, snapshot: &SessionSnapshot) {
        println!(
            "== {} ({} messages{}) ==",
            snapshot.counterpart_label,
            snapshot.timeline.len(),
            if snapshot.realtime { ", live" } else { "" }
        );
        for msg in &snapshot.timeline {
            let when = i64::try_from(msg.timestamp.as_millis())
                .ok()
                .and_then(DateTime::from_timestamp_millis)
                .map(|dt| {
                    dt.with_timezone(&Local)
                        .format(&self.timestamp_format)
                        .to_string()
                })
                .unwrap_or_default();
            let who = match msg.role {
                Role::Local => "you",
                Role::Remote => snapshot.counterpart_label.as_str(),
            };
            let read = if msg.read { " (read)" } else { "" };
            println!("[{when}] {who}: {}{read}", msg.content);
            for media in &msg.media {
                println!("         [{}] {}", msg.message_type, media.url);
            }
        }
        if !snapshot.pending_input.is_empty() {
            println!("draft: {}", snapshot.pending_input);
        }
    }
}
