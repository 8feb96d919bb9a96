//! Shape service — create and update with payload validation.
//!
//! DESIGN
//! ======
//! Creation changes list membership, so peers receive the whole snapshot.
//! Updates touch one known shape, so peers receive just that shape.
//! Last write wins: there is no versioning.
//!
//! ERROR HANDLING
//! ==============
//! Geometry is validated before anything is mutated; a rejected payload
//! leaves the whiteboard untouched. An update naming an unknown id is not
//! an error: it may race a create the sender has not seen yet, so it is
//! dropped silently.

use tracing::debug;

use super::board::snapshot_frame;
use super::{Outcome, RelayError, finite_field, object_arg, string_field};
use crate::frame::{CREATE_SHAPE, Frame, UPDATE_SHAPE};
use crate::state::{BoardState, Geometry, Shape, WhiteboardError};

// =============================================================================
// CREATE
// =============================================================================

/// Append a shape and broadcast the full snapshot to peers.
///
/// # Errors
///
/// Returns `InvalidPayload` for malformed shapes and `DuplicateShape` if the
/// id is already taken.
pub fn create_shape(board: &mut BoardState, frame: &Frame) -> Result<Outcome, RelayError> {
    let shape = parse_shape(object_arg(frame, CREATE_SHAPE)?)?;

    board.whiteboard.insert(shape).map_err(|e| match e {
        WhiteboardError::DuplicateShape(id) => RelayError::DuplicateShape(id),
    })?;

    Ok(Outcome::Broadcast(snapshot_frame(&board.whiteboard)))
}

// =============================================================================
// UPDATE
// =============================================================================

/// Overwrite a stored shape's geometry and broadcast the updated shape.
///
/// # Errors
///
/// Returns `InvalidPayload` if `id` or any geometry field is missing or not
/// a finite number.
pub fn update_shape(board: &mut BoardState, frame: &Frame) -> Result<Outcome, RelayError> {
    let payload = object_arg(frame, UPDATE_SHAPE)?;
    let id = string_field(payload, UPDATE_SHAPE, "id")?;
    let geometry = parse_geometry(payload, UPDATE_SHAPE)?;

    let Some(shape) = board.whiteboard.update_geometry(id, geometry) else {
        debug!(shape_id = id, "update for unknown shape ignored");
        return Ok(Outcome::Ignore);
    };

    let value = serde_json::to_value(shape)
        .map_err(|e| RelayError::InvalidPayload { event: UPDATE_SHAPE, reason: e.to_string() })?;
    Ok(Outcome::Broadcast(Frame::new(UPDATE_SHAPE, vec![value])))
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_shape(payload: &serde_json::Value) -> Result<Shape, RelayError> {
    let id = string_field(payload, CREATE_SHAPE, "id")?.to_owned();
    let Geometry { x, y, w, h } = parse_geometry(payload, CREATE_SHAPE)?;
    let color = payload
        .get("color")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| RelayError::InvalidPayload { event: CREATE_SHAPE, reason: "`color` must be a string".into() })?
        .to_owned();

    Ok(Shape { id, x, y, w, h, color })
}

fn parse_geometry(payload: &serde_json::Value, event: &'static str) -> Result<Geometry, RelayError> {
    Ok(Geometry {
        x: finite_field(payload, event, "x")?,
        y: finite_field(payload, event, "y")?,
        w: finite_field(payload, event, "w")?,
        h: finite_field(payload, event, "h")?,
    })
}

#[cfg(test)]
#[path = "shape_test.rs"]
mod tests;
