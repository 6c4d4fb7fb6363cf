//! Serialization and deserialization for `Taskboard` payloads.
//!
//! Push frames and persisted board snapshots are JSON. Push frames are
//! decoded from WebSocket text; snapshots are the JSON array of tasks that
//! local mode writes to its `tasks` slot.

use crate::event::PushMessage;
use crate::task::Task;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The frame was empty or not text.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Decodes a [`PushMessage`] from a WebSocket text frame.
///
/// # Errors
///
/// Returns `CodecError::InvalidFrame` for a blank frame and
/// `CodecError::Serialization` if the JSON does not match a known message.
pub fn decode_push(text: &str) -> Result<PushMessage, CodecError> {
    if text.trim().is_empty() {
        return Err(CodecError::InvalidFrame("empty push frame".into()));
    }
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`PushMessage`] as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode_push(message: &PushMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a board snapshot for persistence.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if any task cannot be serialized.
pub fn encode_snapshot(tasks: &[Task]) -> Result<String, CodecError> {
    serde_json::to_string(tasks).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a persisted board snapshot.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the text is not a JSON task array.
pub fn decode_snapshot(text: &str) -> Result<Vec<Task>, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Serialization(e.to_string()))
}
