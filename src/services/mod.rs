//! Relay services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service functions are synchronous and operate on a `&mut BoardState` the
//! caller has already locked. Presence (`board`) enqueues its frames
//! directly since join/part are transport events with no reply. Message
//! handlers (`shape`, `cursor`) validate, mutate, and return an `Outcome`;
//! the route applies it while still holding the lock.

pub mod board;
pub mod cursor;
pub mod shape;

use crate::frame::{ErrorCode, Frame};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by message handlers. The dispatch layer uses this to
/// decide who receives what.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Reliable delivery to every participant except the sender.
    Broadcast(Frame),
    /// Droppable delivery to every participant except the sender.
    BroadcastVolatile(Frame),
    /// Nothing to deliver.
    Ignore,
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload { event: &'static str, reason: String },
    #[error("shape already exists: {0}")]
    DuplicateShape(String),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidFrame(_) => "E_INVALID_FRAME",
            Self::UnknownEvent(_) => "E_UNKNOWN_EVENT",
            Self::InvalidPayload { .. } => "E_INVALID_PAYLOAD",
            Self::DuplicateShape(_) => "E_DUPLICATE_SHAPE",
        }
    }
}

// =============================================================================
// PAYLOAD HELPERS
// =============================================================================

/// Read a finite number field from a JSON object.
pub(crate) fn finite_field(
    payload: &serde_json::Value,
    event: &'static str,
    key: &str,
) -> Result<f64, RelayError> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or_else(|| RelayError::InvalidPayload { event, reason: format!("`{key}` must be a finite number") })
}

/// Read a non-empty string field from a JSON object.
pub(crate) fn string_field<'a>(
    payload: &'a serde_json::Value,
    event: &'static str,
    key: &str,
) -> Result<&'a str, RelayError> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::InvalidPayload { event, reason: format!("`{key}` must be a non-empty string") })
}

/// First positional argument of a frame, required to be a JSON object.
pub(crate) fn object_arg<'a>(frame: &'a Frame, event: &'static str) -> Result<&'a serde_json::Value, RelayError> {
    frame
        .first_arg()
        .filter(|v| v.is_object())
        .ok_or_else(|| RelayError::InvalidPayload { event, reason: "expected an object argument".into() })
}
