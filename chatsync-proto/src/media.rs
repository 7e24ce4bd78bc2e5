//! Media classification for outgoing messages.
//!
//! Maps the set of attached media references to a [`MessageType`] tag.
//! The tag is computed once at send time and travels with the request;
//! received messages keep whatever type the backend persisted.

use crate::message::{MediaKind, MediaRef, MessageType};

/// File extensions recognised as video containers (lowercase, no dot).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "m4v", "ogv"];

/// Classifies a list of media references.
///
/// - empty → [`MessageType::Text`]
/// - one video (explicit kind or video extension) → [`MessageType::Video`]
/// - one item otherwise → [`MessageType::Image`]
/// - more than one → [`MessageType::Mixed`]
#[must_use]
pub fn classify(media: &[MediaRef]) -> MessageType {
    match media {
        [] => MessageType::Text,
        [single] if is_video(single) => MessageType::Video,
        [_] => MessageType::Image,
        _ => MessageType::Mixed,
    }
}

/// Returns `true` if the reference is an explicit video or its url path
/// ends in a known video container extension.
#[must_use]
pub fn is_video(media: &MediaRef) -> bool {
    if media.kind == Some(MediaKind::Video) {
        return true;
    }
    url_extension(&media.url)
        .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| ext.eq_ignore_ascii_case(v)))
}

/// Extracts the extension of the last path segment, ignoring any query
/// string or fragment.
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}
