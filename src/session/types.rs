// src/session/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Lifecycle of a therapy session. Transitions are monotonic along the state
/// diagram; `cancelled` and `missed` are reachable only from the pre-live
/// statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Proposed,
    Accepted,
    PendingPayment,
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Missed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::PendingPayment => "pending_payment",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Missed => "missed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SessionError> {
        match s {
            "proposed" => Ok(Self::Proposed),
            "accepted" => Ok(Self::Accepted),
            "pending_payment" => Ok(Self::PendingPayment),
            "scheduled" => Ok(Self::Scheduled),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "missed" => Ok(Self::Missed),
            other => Err(SessionError::protocol(format!("unknown session status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Missed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Video,
    Voice,
    Text,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Voice => "voice",
            Self::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SessionError> {
        match s {
            "video" => Ok(Self::Video),
            "voice" => Ok(Self::Voice),
            "text" => Ok(Self::Text),
            other => Err(SessionError::protocol(format!("unknown session kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Client,
    Therapist,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Therapist => "therapist",
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Client => Self::Therapist,
            Self::Therapist => Self::Client,
        }
    }
}

/// The authoritative session record. Mutated only through
/// [`SqliteSessionStore`](super::store::SqliteSessionStore) operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub client_id: String,
    /// Therapist *profile* id. The therapist's login user id lives in a
    /// different identifier space; see `identity::resolve_role`.
    pub therapist_id: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub client_joined_at: Option<DateTime<Utc>>,
    pub therapist_joined_at: Option<DateTime<Utc>>,
    pub client_left_at: Option<DateTime<Utc>>,
    pub therapist_left_at: Option<DateTime<Utc>>,
    pub recording_url: Option<String>,
    pub summary_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn duration_minutes(&self) -> i64 {
        (self.scheduled_end - self.scheduled_start).num_minutes()
    }

    /// A session is live only when in progress with both participants joined.
    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::InProgress
            && self.client_joined_at.is_some()
            && self.therapist_joined_at.is_some()
    }

    /// The instant the session went live: the second participant's join. None
    /// until both have joined.
    pub fn live_since(&self) -> Option<DateTime<Utc>> {
        match (self.client_joined_at, self.therapist_joined_at) {
            (Some(client), Some(therapist)) => Some(client.max(therapist)),
            _ => None,
        }
    }

    pub fn joined_at(&self, role: ParticipantRole) -> Option<DateTime<Utc>> {
        match role {
            ParticipantRole::Client => self.client_joined_at,
            ParticipantRole::Therapist => self.therapist_joined_at,
        }
    }

    /// RTC channel name scoped to this session.
    pub fn channel_name(&self) -> String {
        format!("session-{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in [
            SessionStatus::Proposed,
            SessionStatus::Accepted,
            SessionStatus::PendingPayment,
            SessionStatus::Scheduled,
            SessionStatus::InProgress,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
            SessionStatus::Missed,
        ] {
            assert_eq!(SessionStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(SessionStatus::parse("bogus").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::Missed.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
    }
}
