//! JSON encoding and decoding for the `ChatSync` wire shapes.
//!
//! Retrieval pages and realtime batches are JSON arrays of records;
//! send requests are single JSON objects.

use serde::de::DeserializeOwned;

use crate::wire::{RawMessage, RawRealtimeMessage, SendRequest};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The payload was valid JSON but not the expected shape.
    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

/// Decodes a retrieval page.
///
/// Accepts either a bare array or an object carrying the array under
/// `"messages"` or `"data"`.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are not a JSON array of records.
pub fn decode_page(bytes: &[u8]) -> Result<Vec<RawMessage>, CodecError> {
    decode_list(bytes)
}

/// Decodes a realtime batch. A single record is treated as a batch of one.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are not a record or array of records.
pub fn decode_realtime_batch(bytes: &[u8]) -> Result<Vec<RawRealtimeMessage>, CodecError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(e.to_string()))?;
    if value.is_object() && value.get("senderId").is_some() {
        let single = serde_json::from_value(value)
            .map_err(|e| CodecError::Serialization(e.to_string()))?;
        return Ok(vec![single]);
    }
    list_from_value(value)
}

/// Decodes a single record, e.g. a send response.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes are not a record.
pub fn decode_message(bytes: &[u8]) -> Result<RawMessage, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a send request as JSON.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if serialization fails.
pub fn encode_request(request: &SendRequest) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(request).map_err(|e| CodecError::Serialization(e.to_string()))
}

fn decode_list<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, CodecError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Serialization(e.to_string()))?;
    list_from_value(value)
}

fn list_from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<Vec<T>, CodecError> {
    let list = match value {
        serde_json::Value::Array(items) => serde_json::Value::Array(items),
        serde_json::Value::Object(mut map) => map
            .remove("messages")
            .or_else(|| map.remove("data"))
            .ok_or_else(|| {
                CodecError::UnexpectedShape("object without messages/data array".to_string())
            })?,
        other => {
            return Err(CodecError::UnexpectedShape(format!(
                "expected array, got {other}"
            )));
        }
    };
    serde_json::from_value(list).map_err(|e| CodecError::Serialization(e.to_string()))
}
