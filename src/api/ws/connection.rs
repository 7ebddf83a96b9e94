// src/api/ws/connection.rs

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::Mutex;
use tracing::debug;

use crate::api::ws::message::WsServerMessage;
use crate::identity::ParticipantIdentity;
use crate::session::types::ParticipantRole;

/// Close code for connect-time role-resolution failure.
pub const CLOSE_ACCESS_DENIED: u16 = 4403;

/// Everything a handler needs to know about its connection, resolved once at
/// connect time and immutable afterwards. Threading this through every call
/// (instead of mutating a long-lived connection object) means the disconnect
/// path can never see a partially-initialized state.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub session_id: String,
    pub identity: ParticipantIdentity,
    pub role: ParticipantRole,
    pub peer_user_id: String,
    pub channel: String,
    pub connected_at: DateTime<Utc>,
}

/// Shared handle on the socket's sink half. Cloned into the broadcast pump
/// task alongside the main loop.
#[derive(Clone)]
pub struct WsSender {
    inner: Arc<Mutex<SplitSink<WebSocket, Message>>>,
}

impl WsSender {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { inner: Arc::new(Mutex::new(sink)) }
    }

    pub async fn send(&self, message: &WsServerMessage) -> anyhow::Result<()> {
        let text = serde_json::to_string(message)?;
        let mut sink = self.inner.lock().await;
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Best-effort error reply; send failures are logged, not propagated.
    pub async fn send_error(&self, message: impl Into<String>, code: &str) {
        let event = WsServerMessage::Error { message: message.into(), code: code.to_string() };
        if let Err(e) = self.send(&event).await {
            debug!("Failed to deliver error event: {}", e);
        }
    }

    pub async fn close_with(&self, code: u16, reason: &str) {
        let mut sink = self.inner.lock().await;
        let _ = sink
            .send(Message::Close(Some(CloseFrame { code, reason: reason.to_string().into() })))
            .await;
        let _ = sink.close().await;
    }

    pub async fn close(&self) {
        let mut sink = self.inner.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

/// Per-connection frame decimation gate: admits every Nth call.
#[derive(Debug)]
pub struct FrameGate {
    seen: u64,
    every: u64,
}

impl FrameGate {
    pub fn new(every: u64) -> Self {
        Self { seen: 0, every: every.max(1) }
    }

    /// True when this frame should be analyzed.
    pub fn admit(&mut self) -> bool {
        self.seen += 1;
        self.seen % self.every == 0
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}
