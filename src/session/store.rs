// src/session/store.rs
//! Session state machine over SQLite. Every operation is its own
//! read-modify-write; callers must never assume a staleness-free read, so each
//! op re-fetches before branching on status.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CONFIG;
use crate::error::{SessionError, SessionResult};
use crate::insight::SessionSummary;
use crate::session::types::{ParticipantRole, Session, SessionKind, SessionStatus};

pub struct SqliteSessionStore {
    pub pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &SqliteRow) -> SessionResult<Session> {
        let to_utc = |naive: NaiveDateTime| Utc.from_utc_datetime(&naive);
        let opt_utc = |naive: Option<NaiveDateTime>| naive.map(|n| Utc.from_utc_datetime(&n));

        Ok(Session {
            id: row.get("id"),
            client_id: row.get("client_id"),
            therapist_id: row.get("therapist_id"),
            scheduled_start: to_utc(row.get("scheduled_start")),
            scheduled_end: to_utc(row.get("scheduled_end")),
            kind: SessionKind::parse(row.get::<String, _>("kind").as_str())?,
            status: SessionStatus::parse(row.get::<String, _>("status").as_str())?,
            client_joined_at: opt_utc(row.get("client_joined_at")),
            therapist_joined_at: opt_utc(row.get("therapist_joined_at")),
            client_left_at: opt_utc(row.get("client_left_at")),
            therapist_left_at: opt_utc(row.get("therapist_left_at")),
            recording_url: row.get("recording_url"),
            summary_json: row.get("summary_json"),
            created_at: to_utc(row.get("created_at")),
        })
    }

    pub async fn fetch(&self, session_id: &str) -> SessionResult<Session> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| SessionError::not_found(format!("session {session_id}")))?;
        Self::row_to_session(&row)
    }

    async fn set_status(&self, session_id: &str, status: SessionStatus) -> SessionResult<()> {
        sqlx::query("UPDATE sessions SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create a client-initiated booking. Every booking requires payment
    /// before scheduling, so new sessions start in `pending_payment`.
    pub async fn create(
        &self,
        client_id: &str,
        therapist_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kind: SessionKind,
    ) -> SessionResult<Session> {
        if end <= start {
            return Err(SessionError::protocol("scheduled_end must be after scheduled_start"));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO sessions (id, client_id, therapist_id, scheduled_start, scheduled_end,
                                  kind, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(client_id)
        .bind(therapist_id)
        .bind(start.naive_utc())
        .bind(end.naive_utc())
        .bind(kind.as_str())
        .bind(SessionStatus::PendingPayment.as_str())
        .bind(now.naive_utc())
        .execute(&self.pool)
        .await?;

        info!("Session {} created: client={} therapist={}", id, client_id, therapist_id);
        self.fetch(&id).await
    }

    /// Payment webhook entry point. Must be re-entrant: webhooks retry, so
    /// confirming an already-scheduled session is a no-op success.
    pub async fn confirm_payment(&self, session_id: &str) -> SessionResult<Session> {
        let session = self.fetch(session_id).await?;
        match session.status {
            SessionStatus::PendingPayment | SessionStatus::Accepted => {
                self.set_status(session_id, SessionStatus::Scheduled).await?;
                info!("Payment confirmed for session {}, now scheduled", session_id);
                self.fetch(session_id).await
            }
            // Already past payment: idempotent no-op
            SessionStatus::Scheduled | SessionStatus::InProgress | SessionStatus::Completed => {
                debug!("confirm_payment no-op for session {} ({})", session_id, session.status.as_str());
                Ok(session)
            }
            other => Err(SessionError::state_conflict(format!(
                "cannot confirm payment from status {}",
                other.as_str()
            ))),
        }
    }

    /// Stamp the role's join marker. Returns the updated session and whether
    /// this join started the session (second participant arriving while
    /// scheduled).
    pub async fn record_join(
        &self,
        session_id: &str,
        role: ParticipantRole,
    ) -> SessionResult<(Session, bool)> {
        let session = self.fetch(session_id).await?;
        if session.status.is_terminal() {
            return Err(SessionError::state_conflict(format!(
                "session {} is {}",
                session_id,
                session.status.as_str()
            )));
        }

        // First join wins; a reconnect keeps the original marker.
        if session.joined_at(role).is_none() {
            let column = match role {
                ParticipantRole::Client => "client_joined_at",
                ParticipantRole::Therapist => "therapist_joined_at",
            };
            let sql = format!("UPDATE sessions SET {column} = ? WHERE id = ?");
            sqlx::query(&sql)
                .bind(Utc::now().naive_utc())
                .bind(session_id)
                .execute(&self.pool)
                .await?;
        }

        // Re-fetch before branching: a concurrent join may have landed.
        let session = self.fetch(session_id).await?;
        let both_present = session.client_joined_at.is_some() && session.therapist_joined_at.is_some();
        if both_present && session.status == SessionStatus::Scheduled {
            self.set_status(session_id, SessionStatus::InProgress).await?;
            info!("Session {} started: both participants joined", session_id);
            return Ok((self.fetch(session_id).await?, true));
        }

        Ok((session, false))
    }

    /// Stamp the role's leave marker. Leaving never changes status; session
    /// completion is driven by the scheduled end time via an external sweep.
    pub async fn record_leave(
        &self,
        session_id: &str,
        role: ParticipantRole,
    ) -> SessionResult<Session> {
        // Existence check doubles as the defensive re-fetch.
        self.fetch(session_id).await?;

        let column = match role {
            ParticipantRole::Client => "client_left_at",
            ParticipantRole::Therapist => "therapist_left_at",
        };
        let sql = format!("UPDATE sessions SET {column} = ? WHERE id = ?");
        sqlx::query(&sql)
            .bind(Utc::now().naive_utc())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        debug!("{} left session {}", role.as_str(), session_id);
        self.fetch(session_id).await
    }

    fn check_cutoff(session: &Session) -> SessionResult<()> {
        let cutoff = Duration::hours(CONFIG.cancellation_cutoff_hours);
        if Utc::now() + cutoff >= session.scheduled_start {
            return Err(SessionError::state_conflict(format!(
                "cancellation window expired: changes require more than {}h notice",
                CONFIG.cancellation_cutoff_hours
            )));
        }
        Ok(())
    }

    fn check_actor(session: &Session, actor_id: &str) -> SessionResult<()> {
        if actor_id != session.client_id && actor_id != session.therapist_id {
            return Err(SessionError::access_denied(format!(
                "{actor_id} is not a participant of session {}",
                session.id
            )));
        }
        Ok(())
    }

    pub async fn cancel(&self, session_id: &str, actor_id: &str) -> SessionResult<Session> {
        let session = self.fetch(session_id).await?;
        Self::check_actor(&session, actor_id)?;
        match session.status {
            SessionStatus::Scheduled | SessionStatus::Proposed | SessionStatus::Accepted => {
                Self::check_cutoff(&session)?;
                self.set_status(session_id, SessionStatus::Cancelled).await?;
                info!("Session {} cancelled by {}", session_id, actor_id);
                self.fetch(session_id).await
            }
            other => Err(SessionError::state_conflict(format!(
                "cannot cancel a session in status {}",
                other.as_str()
            ))),
        }
    }

    pub async fn reschedule(
        &self,
        session_id: &str,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
        actor_id: &str,
    ) -> SessionResult<Session> {
        if new_end <= new_start {
            return Err(SessionError::protocol("scheduled_end must be after scheduled_start"));
        }

        let session = self.fetch(session_id).await?;
        Self::check_actor(&session, actor_id)?;
        if session.status != SessionStatus::Scheduled {
            return Err(SessionError::state_conflict(format!(
                "cannot reschedule a session in status {}",
                session.status.as_str()
            )));
        }
        Self::check_cutoff(&session)?;

        sqlx::query("UPDATE sessions SET scheduled_start = ?, scheduled_end = ? WHERE id = ?")
            .bind(new_start.naive_utc())
            .bind(new_end.naive_utc())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        info!("Session {} rescheduled by {}", session_id, actor_id);
        self.fetch(session_id).await
    }

    /// Used by the external end-of-session sweep.
    pub async fn complete(&self, session_id: &str) -> SessionResult<Session> {
        let session = self.fetch(session_id).await?;
        if session.status != SessionStatus::InProgress {
            return Err(SessionError::state_conflict(format!(
                "cannot complete a session in status {}",
                session.status.as_str()
            )));
        }
        self.set_status(session_id, SessionStatus::Completed).await?;
        self.fetch(session_id).await
    }

    /// Used by the external sweep when nobody showed up.
    pub async fn mark_missed(&self, session_id: &str) -> SessionResult<Session> {
        let session = self.fetch(session_id).await?;
        match session.status {
            SessionStatus::Scheduled | SessionStatus::Proposed | SessionStatus::Accepted => {
                self.set_status(session_id, SessionStatus::Missed).await?;
                self.fetch(session_id).await
            }
            other => Err(SessionError::state_conflict(format!(
                "cannot mark missed a session in status {}",
                other.as_str()
            ))),
        }
    }

    pub async fn attach_recording(&self, session_id: &str, url: &str) -> SessionResult<Session> {
        self.fetch(session_id).await?;
        sqlx::query("UPDATE sessions SET recording_url = ? WHERE id = ?")
            .bind(url)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        self.fetch(session_id).await
    }

    /// Persist the final summary. Regeneration overwrites wholesale; the
    /// record never merges.
    pub async fn finalize_summary(
        &self,
        session_id: &str,
        summary: &SessionSummary,
    ) -> SessionResult<Session> {
        self.fetch(session_id).await?;
        let json = serde_json::to_string(summary)
            .map_err(|e| SessionError::protocol(format!("summary serialization failed: {e}")))?;
        sqlx::query("UPDATE sessions SET summary_json = ? WHERE id = ?")
            .bind(json)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        info!("Summary finalized for session {}", session_id);
        self.fetch(session_id).await
    }
}
