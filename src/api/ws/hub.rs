// src/api/ws/hub.rs
// Per-session broadcast groups: the only cross-task communication primitive.
// Each connection task subscribes on join and forwards events addressed to it.

use std::collections::HashMap;

use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::api::ws::message::WsServerMessage;
use crate::session::types::ParticipantRole;

const GROUP_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum Audience {
    All,
    Role(ParticipantRole),
    User(String),
    ExceptUser(String),
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub audience: Audience,
    pub message: WsServerMessage,
}

impl SessionEvent {
    pub fn all(message: WsServerMessage) -> Self {
        Self { audience: Audience::All, message }
    }

    pub fn role(role: ParticipantRole, message: WsServerMessage) -> Self {
        Self { audience: Audience::Role(role), message }
    }

    pub fn user(user_id: impl Into<String>, message: WsServerMessage) -> Self {
        Self { audience: Audience::User(user_id.into()), message }
    }

    pub fn except(user_id: impl Into<String>, message: WsServerMessage) -> Self {
        Self { audience: Audience::ExceptUser(user_id.into()), message }
    }

    pub fn is_for(&self, user_id: &str, role: ParticipantRole) -> bool {
        match &self.audience {
            Audience::All => true,
            Audience::Role(r) => *r == role,
            Audience::User(u) => u == user_id,
            Audience::ExceptUser(u) => u != user_id,
        }
    }
}

/// Fan-out channels keyed by session id. Joining and leaving are both safe to
/// call redundantly.
pub struct SessionHub {
    groups: Mutex<HashMap<String, broadcast::Sender<SessionEvent>>>,
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHub {
    pub fn new() -> Self {
        Self { groups: Mutex::new(HashMap::new()) }
    }

    pub async fn join(&self, session_id: &str) -> broadcast::Receiver<SessionEvent> {
        let mut groups = self.groups.lock().await;
        let sender = groups
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(GROUP_CAPACITY).0);
        debug!("Joined broadcast group {} ({} members)", session_id, sender.receiver_count() + 1);
        sender.subscribe()
    }

    /// Publish to the group. Returns the number of receivers reached; a
    /// missing or empty group is not an error.
    pub async fn publish(&self, session_id: &str, event: SessionEvent) -> usize {
        let groups = self.groups.lock().await;
        match groups.get(session_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the group once the last receiver is gone. The caller's own
    /// receiver must already be dropped.
    pub async fn leave(&self, session_id: &str) {
        let mut groups = self.groups.lock().await;
        if let Some(sender) = groups.get(session_id) {
            if sender.receiver_count() == 0 {
                groups.remove(session_id);
                debug!("Broadcast group {} removed", session_id);
            }
        }
    }

    pub async fn member_count(&self, session_id: &str) -> usize {
        let groups = self.groups.lock().await;
        groups.get(session_id).map(|s| s.receiver_count()).unwrap_or(0)
    }
}
