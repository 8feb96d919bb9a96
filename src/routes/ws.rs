//! WebSocket handler — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a participant id and enters a `select!` loop:
//! - Incoming participant frames → parse + dispatch by event name
//! - Frames queued by peers → forward to participant, in enqueue order
//!
//! Reliable and volatile frames share one outbound queue so one sender's
//! frames never overtake each other. Volatile frames are dropped at enqueue
//! when the peer already has a full quota of them waiting.
//!
//! Handler functions are pure business logic: they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns fan-out and applies it
//! under the same lock as the mutation.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `connected` with the participant id
//! 2. Join → snapshot + presence handshake
//! 3. Participant sends frames → dispatch → outcome applied
//! 4. Close → part → `user-exited` to the remaining participants

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{CONNECTED, CREATE_SHAPE, CURSOR_POSITION, Frame, UPDATE_SHAPE};
use crate::services::{self, Outcome, RelayError};
use crate::state::{AppState, Participant};

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let participant_id = Uuid::new_v4();

    let (participant, mut outbox) = Participant::channel(state.config.volatile_capacity);

    let welcome = Frame::new(CONNECTED, vec![json!(participant_id)]);
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    {
        let mut board = state.board.write().await;
        services::board::join(&mut board, participant_id, participant);
    }
    info!(%participant_id, "ws: participant connected");

    'conn: loop {
        tokio::select! {
            biased;
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for frame in process_inbound_text(&state, participant_id, text.as_str()).await {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = outbox.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    {
        let mut board = state.board.write().await;
        services::board::part(&mut board, participant_id);
    }
    info!(%participant_id, "ws: participant disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Peers are reached only through the outcome fan-out; the sender only ever
/// gets error replies.
pub(crate) async fn process_inbound_text(state: &AppState, participant_id: Uuid, text: &str) -> Vec<Frame> {
    let frame = match Frame::from_text(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(%participant_id, error = %e, "ws: invalid inbound frame");
            return vec![Frame::error_from(&RelayError::InvalidFrame(e.to_string()))];
        }
    };

    if frame.event != CURSOR_POSITION {
        info!(%participant_id, event = %frame.event, "ws: recv frame");
    }

    let mut board = state.board.write().await;
    let result = match frame.event.as_str() {
        CURSOR_POSITION => services::cursor::cursor_position(participant_id, &frame),
        CREATE_SHAPE => services::shape::create_shape(&mut board, &frame),
        UPDATE_SHAPE => services::shape::update_shape(&mut board, &frame),
        other => Err(RelayError::UnknownEvent(other.to_owned())),
    };

    match result {
        Ok(Outcome::Broadcast(out)) => {
            services::board::broadcast(&board, &out, Some(participant_id));
            vec![]
        }
        Ok(Outcome::BroadcastVolatile(out)) => {
            let dropped = services::board::broadcast_volatile(&board, &out, Some(participant_id));
            if dropped > 0 {
                debug!(%participant_id, dropped, "ws: volatile frame dropped for congested peers");
            }
            vec![]
        }
        Ok(Outcome::Ignore) => vec![],
        Err(e) => {
            warn!(%participant_id, event = %frame.event, error = %e, "ws: rejected frame");
            vec![Frame::error_from(&e)]
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match frame.to_text() {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.event != CURSOR_POSITION {
        debug!(event = %frame.event, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
