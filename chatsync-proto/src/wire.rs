//! Raw wire shapes exchanged with the retrieval, send and realtime APIs.
//!
//! The backend speaks loosely-typed JSON: media may arrive as a single url,
//! a JSON-encoded array string, or a list of descriptors; timestamps may be
//! ISO-8601 strings, numeric strings, or epoch numbers. Everything is
//! validated here, at the ingestion boundary, into a canonical
//! [`Message`] before it can reach a timeline.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::media::classify;
use crate::message::{
    MediaKind, MediaRef, Message, MessageId, MessageType, OutgoingMessage, ParticipantId, Role,
    Timestamp,
};

/// Epoch numbers below this value are interpreted as seconds.
const SECONDS_CUTOFF: f64 = 1e12;

/// Digest bytes kept in a fallback id.
const FALLBACK_DIGEST_BYTES: usize = 8;

/// Which side of a store conversation authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SenderType {
    /// The shopper side.
    Customer,
    /// The merchant side.
    Store,
}

/// A timestamp in any of the shapes the backend emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Epoch seconds or milliseconds.
    Number(f64),
    /// ISO-8601 text or a numeric string.
    Text(String),
}

impl From<Timestamp> for RawTimestamp {
    /// Renders the instant as RFC 3339 with millisecond precision.
    fn from(ts: Timestamp) -> Self {
        i64::try_from(ts.as_millis())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map_or_else(
                || Self::Text(ts.as_millis().to_string()),
                |dt| Self::Text(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            )
    }
}

/// One media descriptor as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMediaItem {
    /// Location of the media.
    pub url: String,
    /// Optional kind hint (`"image"`, `"video"`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl From<&MediaRef> for RawMediaItem {
    fn from(media: &MediaRef) -> Self {
        Self {
            url: media.url.clone(),
            kind: media.kind.map(|k| match k {
                MediaKind::Image => "image".to_string(),
                MediaKind::Video => "video".to_string(),
            }),
        }
    }
}

/// The `mediaUrl` field: a bare string or a list of descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMedia {
    /// A single url, or a JSON-encoded array of descriptors or urls.
    Single(String),
    /// A list of descriptors.
    List(Vec<RawMediaItem>),
}

/// A message as returned by the retrieval and send APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    /// Backend id, when present.
    #[serde(default)]
    pub id: Option<String>,
    /// Author's participant id.
    pub sender_id: String,
    /// Author's side of the conversation.
    pub sender_type: SenderType,
    /// Text body.
    #[serde(default)]
    pub content: Option<String>,
    /// Persisted content-type tag.
    #[serde(default)]
    pub message_type: Option<String>,
    /// Attached media.
    #[serde(default)]
    pub media_url: Option<RawMedia>,
    /// Creation instant.
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
    /// Read flag.
    #[serde(default, alias = "read")]
    pub is_read: Option<bool>,
}

/// A message pushed by the realtime channel.
///
/// Same shape as [`RawMessage`] but the instant may arrive under either
/// `createdAt` or `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRealtimeMessage {
    /// Backend id, when present.
    #[serde(default)]
    pub id: Option<String>,
    /// Author's participant id.
    pub sender_id: String,
    /// Author's side of the conversation.
    pub sender_type: SenderType,
    /// Text body.
    #[serde(default)]
    pub content: Option<String>,
    /// Persisted content-type tag.
    #[serde(default)]
    pub message_type: Option<String>,
    /// Attached media.
    #[serde(default)]
    pub media_url: Option<RawMedia>,
    /// Creation instant.
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
    /// Alternate creation instant field.
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    /// Read flag.
    #[serde(default, alias = "read")]
    pub is_read: Option<bool>,
}

impl From<RawRealtimeMessage> for RawMessage {
    fn from(raw: RawRealtimeMessage) -> Self {
        Self {
            id: raw.id,
            sender_id: raw.sender_id,
            sender_type: raw.sender_type,
            content: raw.content,
            message_type: raw.message_type,
            media_url: raw.media_url,
            created_at: raw.created_at.or(raw.timestamp),
            is_read: raw.is_read,
        }
    }
}

impl From<RawMessage> for RawRealtimeMessage {
    fn from(raw: RawMessage) -> Self {
        Self {
            id: raw.id,
            sender_id: raw.sender_id,
            sender_type: raw.sender_type,
            content: raw.content,
            message_type: raw.message_type,
            media_url: raw.media_url,
            created_at: raw.created_at,
            timestamp: None,
            is_read: raw.is_read,
        }
    }
}

/// Body of a send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Local participant id.
    pub sender_id: String,
    /// Local participant's side of the conversation.
    pub sender_type: SenderType,
    /// Text body.
    pub content: String,
    /// Classified content-type tag.
    pub message_type: MessageType,
    /// Attached media, omitted for text messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<Vec<RawMediaItem>>,
}

impl SendRequest {
    /// Builds a request for an already classified outgoing message.
    #[must_use]
    pub fn new(
        sender: &ParticipantId,
        sender_type: SenderType,
        outgoing: &OutgoingMessage,
        message_type: MessageType,
    ) -> Self {
        let media_url = if outgoing.media.is_empty() {
            None
        } else {
            Some(outgoing.media.iter().map(RawMediaItem::from).collect())
        };
        Self {
            sender_id: sender.as_str().to_string(),
            sender_type,
            content: outgoing.content.clone(),
            message_type,
            media_url,
        }
    }
}

impl RawMessage {
    /// Builds the record a backend persists for `request`.
    #[must_use]
    pub fn from_request(request: SendRequest, id: String, created_at: Timestamp) -> Self {
        Self {
            id: Some(id),
            sender_id: request.sender_id,
            sender_type: request.sender_type,
            content: Some(request.content),
            message_type: Some(request.message_type.as_wire().to_string()),
            media_url: request.media_url.map(RawMedia::List),
            created_at: Some(RawTimestamp::from(created_at)),
            is_read: Some(false),
        }
    }

    /// Validates this record into a canonical [`Message`].
    ///
    /// `local` decides the [`Role`]. `received_at` stands in for a missing
    /// creation instant. A missing id is replaced by the deterministic
    /// `"{senderId}:{millis}:{digest}"`, where the digest covers the content
    /// and media urls, so both sources agree on it while distinct messages
    /// sent in the same instant stay distinct. An unknown or
    /// missing message type falls back to [`classify`] over the media.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the sender is blank, the timestamp cannot
    /// be parsed, or a media descriptor is malformed.
    pub fn into_message(
        self,
        local: &ParticipantId,
        received_at: Timestamp,
    ) -> Result<Message, IngestError> {
        let sender = self.sender_id.trim();
        if sender.is_empty() {
            return Err(IngestError::MissingSender);
        }

        let timestamp = match &self.created_at {
            Some(raw) => parse_timestamp(raw)?,
            None => received_at,
        };

        let media = match self.media_url {
            Some(raw) => parse_media(raw)?,
            None => Vec::new(),
        };
        let content = self.content.unwrap_or_default();

        let id = match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => MessageId::new(id),
            _ => MessageId::new(format!(
                "{sender}:{}:{}",
                timestamp.as_millis(),
                content_digest(&content, &media)
            )),
        };

        let message_type = self
            .message_type
            .as_deref()
            .and_then(MessageType::from_wire)
            .unwrap_or_else(|| classify(&media));

        let role = if sender == local.as_str() {
            Role::Local
        } else {
            Role::Remote
        };

        Ok(Message {
            id,
            role,
            content,
            message_type,
            media,
            timestamp,
            read: self.is_read.unwrap_or(false),
        })
    }
}

/// Error returned when a raw record cannot enter a timeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// The record has no sender id.
    #[error("record has no sender id")]
    MissingSender,
    /// The creation instant could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    /// A media descriptor has an empty url.
    #[error("media item {index} has an empty url")]
    EmptyMediaUrl {
        /// Position of the offending item.
        index: usize,
    },
    /// A JSON-encoded media list could not be decoded.
    #[error("malformed media list: {0}")]
    MalformedMedia(String),
}

/// Parses any [`RawTimestamp`] shape into epoch milliseconds.
///
/// # Errors
///
/// Returns [`IngestError::InvalidTimestamp`] for negative, non-finite or
/// unparseable values.
pub fn parse_timestamp(raw: &RawTimestamp) -> Result<Timestamp, IngestError> {
    match raw {
        RawTimestamp::Number(n) => from_epoch_number(*n),
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(n) = text.parse::<f64>() {
                return from_epoch_number(n);
            }
            let millis = DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.timestamp_millis())
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
                        .map(|dt| dt.and_utc().timestamp_millis())
                })
                .map_err(|_| IngestError::InvalidTimestamp(text.to_string()))?;
            u64::try_from(millis)
                .map(Timestamp::from_millis)
                .map_err(|_| IngestError::InvalidTimestamp(text.to_string()))
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
/// Hex prefix of a SHA-256 over the content and media urls.
fn content_digest(content: &str, media: &[MediaRef]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    for item in media {
        hasher.update([0]);
        hasher.update(item.url.as_bytes());
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(FALLBACK_DIGEST_BYTES * 2);
    for byte in digest.iter().take(FALLBACK_DIGEST_BYTES) {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn from_epoch_number(n: f64) -> Result<Timestamp, IngestError> {
    if !n.is_finite() || n < 0.0 {
        return Err(IngestError::InvalidTimestamp(n.to_string()));
    }
    let millis = if n < SECONDS_CUTOFF { n * 1000.0 } else { n };
    Ok(Timestamp::from_millis(millis.round() as u64))
}

/// Normalises the `mediaUrl` union into typed references.
///
/// # Errors
///
/// Returns [`IngestError`] for blank urls inside a list or an undecodable
/// JSON-encoded list.
pub fn parse_media(raw: RawMedia) -> Result<Vec<MediaRef>, IngestError> {
    let items = match raw {
        RawMedia::Single(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(Vec::new());
            }
            if text.starts_with('[') {
                decode_media_list(text)?
            } else {
                vec![RawMediaItem {
                    url: text.to_string(),
                    kind: None,
                }]
            }
        }
        RawMedia::List(items) => items,
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let url = item.url.trim();
            if url.is_empty() {
                return Err(IngestError::EmptyMediaUrl { index });
            }
            Ok(MediaRef {
                url: url.to_string(),
                kind: item.kind.as_deref().and_then(MediaKind::from_wire),
            })
        })
        .collect()
}

fn decode_media_list(text: &str) -> Result<Vec<RawMediaItem>, IngestError> {
    serde_json::from_str::<Vec<RawMediaItem>>(text).or_else(|_| {
        serde_json::from_str::<Vec<String>>(text)
            .map(|urls| {
                urls.into_iter()
                    .map(|url| RawMediaItem { url, kind: None })
                    .collect()
            })
            .map_err(|e| IngestError::MalformedMedia(e.to_string()))
    })
}
