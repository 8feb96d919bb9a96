//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The relay binds the realtime websocket endpoint plus a status endpoint
//! that speaks the same poll-then-stream readiness protocol as the hosted
//! provisioning platform, so a session can bootstrap against a local relay
//! exactly as it would against a spawned backend. No authentication; CORS
//! is open to any origin.

pub mod status;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full relay router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(ws::handle_ws))
        .route("/ws", get(ws::handle_ws))
        .route("/status", get(status::status))
        .route("/status/stream", get(status::status_stream))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
