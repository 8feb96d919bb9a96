//! Cursor service — ephemeral cursor position rebroadcast.
//!
//! DESIGN
//! ======
//! Cursor positions are purely ephemeral: rebroadcast to peers on the
//! volatile class and immediately forgotten. A newer position supersedes
//! any older one, so dropping under congestion loses nothing that matters.

use serde_json::json;
use uuid::Uuid;

use super::{Outcome, RelayError, finite_field, object_arg};
use crate::frame::{CURSOR_POSITION, Frame};

/// Tag an inbound `{x, y}` with the sender id for peers.
///
/// # Errors
///
/// Returns `InvalidPayload` if `x` or `y` is missing or not a finite number.
pub fn cursor_position(participant_id: Uuid, frame: &Frame) -> Result<Outcome, RelayError> {
    let payload = object_arg(frame, CURSOR_POSITION)?;
    let x = finite_field(payload, CURSOR_POSITION, "x")?;
    let y = finite_field(payload, CURSOR_POSITION, "y")?;

    let data = json!({
        "id": participant_id,
        "cursorX": x,
        "cursorY": y,
    });
    Ok(Outcome::BroadcastVolatile(Frame::new(CURSOR_POSITION, vec![data])))
}
