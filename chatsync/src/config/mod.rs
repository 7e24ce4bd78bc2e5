//! Configuration for the `chatsync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatsync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::chat::{
    DEFAULT_EVENT_BUFFER, DEFAULT_FETCH_LIMIT, DEFAULT_POLL_INTERVAL, DEFAULT_REALTIME_BUFFER,
    SessionConfig,
};
use chatsync_proto::message::MAX_CONTENT_LEN;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    identity: IdentityFileConfig,
    session: SessionFileConfig,
    demo: DemoFileConfig,
}

/// `[identity]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    participant_id: Option<String>,
    auth_token: Option<String>,
}

/// `[session]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    fetch_limit: Option<usize>,
    load_on_open: Option<bool>,
    realtime: Option<bool>,
    realtime_buffer: Option<usize>,
    poll_interval_secs: Option<u64>,
    max_content_len: Option<usize>,
    event_buffer: Option<usize>,
}

/// `[demo]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DemoFileConfig {
    counterpart_id: Option<String>,
    counterpart_label: Option<String>,
    seed_file: Option<PathBuf>,
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Identity --
    /// Local participant id registered with the backend.
    pub participant_id: Option<String>,
    /// Bearer token for the local participant.
    pub auth_token: Option<String>,

    // -- Session --
    /// Messages requested per load.
    pub fetch_limit: usize,
    /// Load the timeline as part of opening a conversation.
    pub load_on_open: bool,
    /// Subscribe to realtime updates.
    pub realtime: bool,
    /// Realtime queue capacity, in batches.
    pub realtime_buffer: usize,
    /// Polling period; `None` disables polling.
    pub poll_interval: Option<Duration>,
    /// Maximum outgoing content length in bytes.
    pub max_content_len: usize,
    /// Session event channel capacity.
    pub event_buffer: usize,

    // -- Demo --
    /// Counterpart to open on start.
    pub counterpart_id: Option<String>,
    /// Display label for the counterpart.
    pub counterpart_label: Option<String>,
    /// JSON retrieval page used to seed the in-memory backend.
    pub seed_file: Option<PathBuf>,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            participant_id: None,
            auth_token: None,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            load_on_open: true,
            realtime: true,
            realtime_buffer: DEFAULT_REALTIME_BUFFER,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
            max_content_len: MAX_CONTENT_LEN,
            event_buffer: DEFAULT_EVENT_BUFFER,
            counterpart_id: None,
            counterpart_label: None,
            seed_file: None,
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let session = &file.session;

        Self {
            participant_id: cli
                .participant_id
                .clone()
                .or_else(|| file.identity.participant_id.clone()),
            auth_token: cli
                .auth_token
                .clone()
                .or_else(|| file.identity.auth_token.clone()),
            fetch_limit: session.fetch_limit.unwrap_or(defaults.fetch_limit),
            load_on_open: session.load_on_open.unwrap_or(defaults.load_on_open),
            realtime: !cli.no_realtime && session.realtime.unwrap_or(defaults.realtime),
            realtime_buffer: session.realtime_buffer.unwrap_or(defaults.realtime_buffer),
            poll_interval: match session.poll_interval_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.poll_interval,
            },
            max_content_len: session.max_content_len.unwrap_or(defaults.max_content_len),
            event_buffer: session.event_buffer.unwrap_or(defaults.event_buffer),
            counterpart_id: cli
                .counterpart
                .clone()
                .or_else(|| file.demo.counterpart_id.clone()),
            counterpart_label: cli
                .label
                .clone()
                .or_else(|| file.demo.counterpart_label.clone()),
            seed_file: cli
                .seed_file
                .clone()
                .or_else(|| file.demo.seed_file.clone()),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.demo.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Engine tunables derived from this configuration.
    #[must_use]
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            fetch_limit: self.fetch_limit,
            load_on_open: self.load_on_open,
            realtime: self.realtime,
            realtime_buffer: self.realtime_buffer,
            poll_interval: self.poll_interval,
            max_content_len: self.max_content_len,
            event_buffer: self.event_buffer,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Client-side conversation sync engine (in-memory demo)")]
pub struct CliArgs {
    /// Your participant id.
    #[arg(long, env = "CHATSYNC_PARTICIPANT")]
    pub participant_id: Option<String>,

    /// Bearer token for your participant.
    #[arg(long, env = "CHATSYNC_TOKEN")]
    pub auth_token: Option<String>,

    /// Store to open a conversation with.
    #[arg(long, env = "CHATSYNC_COUNTERPART")]
    pub counterpart: Option<String>,

    /// Display label for the counterpart.
    #[arg(long)]
    pub label: Option<String>,

    /// Path to config file (default: `~/.config/chatsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Disable the realtime subscription (polling only).
    #[arg(long)]
    pub no_realtime: bool,

    /// JSON retrieval page to seed the conversation with.
    #[arg(long)]
    pub seed_file: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATSYNC_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Load and parse a TOML config file.
///
/// An explicit path must exist; the default path may be missing.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("chatsync").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
