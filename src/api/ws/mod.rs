// src/api/ws/mod.rs
// WebSocket layer: connection orchestration, message envelopes, broadcast
// groups and heartbeats.

use std::sync::Arc;

use axum::{Router, routing::get};

pub mod connection;
pub mod heartbeat;
pub mod hub;
pub mod message;
pub mod session;

pub use session::ws_session_handler;

use crate::state::AppState;

/// WebSocket router: one duplex endpoint per session.
pub fn ws_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/session/{session_id}", get(ws_session_handler))
        .with_state(app_state)
}
