//! Board service — join/part presence, snapshots, and fan-out.
//!
//! DESIGN
//! ======
//! A joining participant receives the full snapshot first, then one
//! `user-entered` per participant already present. Everyone else learns
//! about the newcomer through a single `user-entered` broadcast. Parting
//! removes the participant before broadcasting `user-exited`, so the
//! departing connection never receives its own exit.

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::frame::{Frame, SNAPSHOT, USER_ENTERED, USER_EXITED};
use crate::state::{BoardState, Participant, WhiteboardState};

// =============================================================================
// JOIN / PART
// =============================================================================

/// Add a participant to the board and run the presence handshake.
pub fn join(board: &mut BoardState, participant_id: Uuid, participant: Participant) {
    participant.send(snapshot_frame(&board.whiteboard));

    let entered = Frame::new(USER_ENTERED, vec![json!(participant_id)]);
    broadcast(board, &entered, Some(participant_id));

    for existing_id in board.participants.keys() {
        participant.send(Frame::new(USER_ENTERED, vec![json!(existing_id)]));
    }

    board.participants.insert(participant_id, participant);
    info!(%participant_id, participants = board.participants.len(), "participant joined");
}

/// Remove a participant and tell the rest. No-op if it already left.
pub fn part(board: &mut BoardState, participant_id: Uuid) {
    if board.participants.remove(&participant_id).is_none() {
        return;
    }

    let exited = Frame::new(USER_EXITED, vec![json!(participant_id)]);
    broadcast(board, &exited, None);
    info!(%participant_id, remaining = board.participants.len(), "participant left");
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Reliable fan-out to every participant, optionally excluding one.
pub fn broadcast(board: &BoardState, frame: &Frame, exclude: Option<Uuid>) {
    for (participant_id, participant) in &board.participants {
        if exclude == Some(*participant_id) {
            continue;
        }
        participant.send(frame.clone());
    }
}

/// Best-effort fan-out. Participants with a congested volatile queue miss
/// this frame; returns how many were skipped.
pub fn broadcast_volatile(board: &BoardState, frame: &Frame, exclude: Option<Uuid>) -> usize {
    let mut dropped = 0;
    for (participant_id, participant) in &board.participants {
        if exclude == Some(*participant_id) {
            continue;
        }
        if !participant.send_volatile(frame.clone()) {
            dropped += 1;
        }
    }
    dropped
}

// =============================================================================
// HELPERS
// =============================================================================

/// Full ordered shape list as a `snapshot` frame.
#[must_use]
pub fn snapshot_frame(whiteboard: &WhiteboardState) -> Frame {
    let shapes = serde_json::to_value(whiteboard.shapes()).unwrap_or_else(|_| json!([]));
    Frame::new(SNAPSHOT, vec![shapes])
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
