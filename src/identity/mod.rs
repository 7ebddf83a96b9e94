// src/identity/mod.rs
// Therapist accounts live in two identifier spaces: the login user id and the
// therapist profile id stored on the session record. Both are resolved here
// exactly once at connect time into a ParticipantIdentity; nothing downstream
// re-derives it per event.

use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::session::types::{ParticipantRole, Session};

/// Identity resolved once at session-join time and threaded through every
/// handler call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantIdentity {
    /// Authenticated principal id (from upstream auth, never from payloads).
    pub user_id: String,
    /// Therapist profile id, when the principal is a therapist account.
    pub profile_id: Option<String>,
}

/// Lookup table mapping therapist user accounts to their profile ids.
pub struct TherapistDirectory {
    pool: SqlitePool,
}

impl TherapistDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn profile_for_user(&self, user_id: &str) -> SessionResult<Option<String>> {
        let row = sqlx::query("SELECT profile_id FROM therapist_profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("profile_id")))
    }

    pub async fn register(&self, profile_id: &str, user_id: &str) -> SessionResult<()> {
        sqlx::query(
            "INSERT INTO therapist_profiles (profile_id, user_id) VALUES (?, ?)
             ON CONFLICT(user_id) DO UPDATE SET profile_id = excluded.profile_id",
        )
        .bind(profile_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Resolve the caller's role against the session record. The identity comes
/// from the authenticated principal and is cross-checked against the stored
/// participant ids; client-supplied claims are never consulted. Deterministic:
/// the same (session, user_id) pair always resolves identically.
pub async fn resolve_role(
    session: &Session,
    user_id: &str,
    directory: &TherapistDirectory,
) -> SessionResult<(ParticipantRole, ParticipantIdentity)> {
    if user_id == session.client_id {
        return Ok((
            ParticipantRole::Client,
            ParticipantIdentity { user_id: user_id.to_string(), profile_id: None },
        ));
    }

    // Direct match: the session stores the therapist profile id, and some
    // callers authenticate with it directly.
    if user_id == session.therapist_id {
        return Ok((
            ParticipantRole::Therapist,
            ParticipantIdentity {
                user_id: user_id.to_string(),
                profile_id: Some(session.therapist_id.clone()),
            },
        ));
    }

    // Therapist logged in with their user account: map through the directory.
    if let Some(profile_id) = directory.profile_for_user(user_id).await? {
        if profile_id == session.therapist_id {
            debug!("Resolved therapist user {} via profile {}", user_id, profile_id);
            return Ok((
                ParticipantRole::Therapist,
                ParticipantIdentity { user_id: user_id.to_string(), profile_id: Some(profile_id) },
            ));
        }
    }

    Err(SessionError::access_denied(format!(
        "{user_id} is not a participant of session {}",
        session.id
    )))
}
