//! Canonical timeline types for the `ChatSync` engine.
//!
//! Everything in this module has already passed the ingestion boundary
//! (see [`crate::wire`]): identifiers are present, timestamps are resolved
//! to epoch milliseconds and media references are typed.

use serde::{Deserialize, Serialize};

/// Default maximum outgoing content length in bytes.
pub const MAX_CONTENT_LEN: usize = 4096;

/// Identifier of a message, as assigned by the backend.
///
/// Stable across sources: the retrieval API and the realtime channel agree
/// on the id of the same logical message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a conversation participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates a participant id from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Who authored a message, relative to the session's own participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Authored by this session's participant.
    Local,
    /// Authored by the counterpart.
    Remote,
}

/// Content-type tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Text only, no media attached.
    Text,
    /// A single image.
    Image,
    /// A single video.
    Video,
    /// More than one media item.
    Mixed,
}

impl MessageType {
    /// Parses the persisted wire tag, ignoring ASCII case.
    #[must_use]
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// Returns the wire tag for this type.
    #[must_use]
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Explicit kind hint carried by a media reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video clip.
    Video,
}

impl MediaKind {
    /// Parses a wire kind hint. Unknown hints yield `None`.
    #[must_use]
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// A single attached media item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    /// Location of the media.
    pub url: String,
    /// Optional kind hint supplied by the uploader.
    pub kind: Option<MediaKind>,
}

impl MediaRef {
    /// Creates a media reference with no kind hint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: None,
        }
    }

    /// Creates a media reference with an explicit kind hint.
    pub fn with_kind(url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            kind: Some(kind),
        }
    }
}

/// One entry of a conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Backend-assigned id, unique within a timeline.
    pub id: MessageId,
    /// Author relative to the local participant.
    pub role: Role,
    /// Text body.
    pub content: String,
    /// Content-type tag, as persisted by the backend.
    pub message_type: MessageType,
    /// Attached media in upload order. Empty for [`MessageType::Text`].
    pub media: Vec<MediaRef>,
    /// Creation instant; the timeline sort key.
    pub timestamp: Timestamp,
    /// Whether the recipient has read this message.
    pub read: bool,
}

/// Error returned when an outgoing message fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Neither content nor media was supplied.
    #[error("message has no content and no media")]
    Empty,
    /// Content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// A media reference has an empty url.
    #[error("media item {index} has an empty url")]
    EmptyMediaUrl {
        /// Position of the offending item.
        index: usize,
    },
}

/// A message the local participant is about to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Text body (may be empty when media is attached).
    pub content: String,
    /// Attached media in upload order.
    pub media: Vec<MediaRef>,
}

impl OutgoingMessage {
    /// Creates an outgoing message.
    pub fn new(content: impl Into<String>, media: Vec<MediaRef>) -> Self {
        Self {
            content: content.into(),
            media,
        }
    }

    /// Validates this message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if there is neither text nor media,
    /// [`ValidationError::TooLarge`] if the text exceeds `max_len` bytes, or
    /// [`ValidationError::EmptyMediaUrl`] for a blank media url.
    pub fn validate(&self, max_len: usize) -> Result<(), ValidationError> {
        if self.content.trim().is_empty() && self.media.is_empty() {
            return Err(ValidationError::Empty);
        }
        let size = self.content.len();
        if size > max_len {
            return Err(ValidationError::TooLarge { size, max: max_len });
        }
        if let Some(index) = self.media.iter().position(|m| m.url.trim().is_empty()) {
            return Err(ValidationError::EmptyMediaUrl { index });
        }
        Ok(())
    }
}
