//! Frame — the universal message type for the whiteboard relay.
//!
//! ARCHITECTURE
//! ============
//! Every realtime message is a Frame: an event name plus a positional list
//! of JSON arguments, mirroring `send(event, ...args)` on the client side.
//! Frames travel as one websocket text message each.
//!
//! DESIGN
//! ======
//! - Event names are freeform strings. The relay validates payload shapes
//!   only for the events it understands (see `services`).
//! - `args` is always an array, even for single-payload events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// EVENT NAMES
// =============================================================================

/// First frame on every relay connection. Carries the participant id.
pub const CONNECTED: &str = "connected";

/// Full ordered shape list.
pub const SNAPSHOT: &str = "snapshot";

/// Presence: a participant joined.
pub const USER_ENTERED: &str = "user-entered";

/// Presence: a participant left.
pub const USER_EXITED: &str = "user-exited";

/// Volatile cursor movement.
pub const CURSOR_POSITION: &str = "cursor-position";

/// Append a shape to the whiteboard.
pub const CREATE_SHAPE: &str = "create-shape";

/// Overwrite the geometry of an existing shape.
pub const UPDATE_SHAPE: &str = "update-shape";

/// Error reply, sent to the offending participant only.
pub const ERROR: &str = "error";

/// Error frame payload key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Error frame payload key for human-readable messages.
pub const FRAME_MESSAGE: &str = "message";

// =============================================================================
// TYPES
// =============================================================================

/// The universal message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Grepable error code for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Frame {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self { event: event.into(), args }
    }

    /// Create a structured error frame from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        let payload = serde_json::json!({
            FRAME_CODE: err.error_code(),
            FRAME_MESSAGE: err.to_string(),
        });
        Self::new(ERROR, vec![payload])
    }
}

// =============================================================================
// CODEC
// =============================================================================

impl Frame {
    /// First positional argument, if any.
    #[must_use]
    pub fn first_arg(&self) -> Option<&Value> {
        self.args.first()
    }

    /// Serialize to the websocket text representation.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument cannot be serialized.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a websocket text message.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON frame.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// TESTS
// =============================================================================
