// tests/session_state_machine.rs
// Lifecycle coverage for the session state machine: transitions only along
// the documented diagram, idempotent payment confirmation, and the
// cancellation cutoff window.

use chrono::{Duration, Utc};

use solace::analysis::{EmotionLabel, EmotionSample, RollingWindow};
use solace::db::memory_pool;
use solace::error::SessionError;
use solace::insight;
use solace::session::{ParticipantRole, Session, SessionKind, SessionStatus, SqliteSessionStore};

async fn store() -> SqliteSessionStore {
    SqliteSessionStore::new(memory_pool().await.unwrap())
}

async fn scheduled_session(store: &SqliteSessionStore, hours_out: i64) -> Session {
    let start = Utc::now() + Duration::hours(hours_out);
    let created = store
        .create("client-1", "therapist-1", start, start + Duration::minutes(50), SessionKind::Video)
        .await
        .unwrap();
    store.confirm_payment(&created.id).await.unwrap()
}

#[tokio::test]
async fn create_starts_in_pending_payment() {
    let store = store().await;
    let start = Utc::now() + Duration::hours(48);
    let session = store
        .create("client-1", "therapist-1", start, start + Duration::minutes(50), SessionKind::Video)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::PendingPayment);
    assert_eq!(session.duration_minutes(), 50);
    assert!(session.client_joined_at.is_none());
    assert!(!session.is_live());
}

#[tokio::test]
async fn create_rejects_inverted_schedule() {
    let store = store().await;
    let start = Utc::now() + Duration::hours(48);
    let result = store
        .create("client-1", "therapist-1", start, start - Duration::minutes(10), SessionKind::Video)
        .await;
    assert!(matches!(result, Err(SessionError::Protocol(_))));
}

#[tokio::test]
async fn confirm_payment_is_idempotent() {
    let store = store().await;
    let session = scheduled_session(&store, 48).await;
    assert_eq!(session.status, SessionStatus::Scheduled);

    // Webhook retry: same final status, no error
    let again = store.confirm_payment(&session.id).await.unwrap();
    assert_eq!(again.status, SessionStatus::Scheduled);

    assert!(matches!(
        store.confirm_payment("no-such-session").await,
        Err(SessionError::NotFound(_))
    ));
}

#[tokio::test]
async fn session_starts_only_when_both_join() {
    let store = store().await;
    let session = scheduled_session(&store, 1).await;

    let (after_client, started) =
        store.record_join(&session.id, ParticipantRole::Client).await.unwrap();
    assert!(!started);
    assert_eq!(after_client.status, SessionStatus::Scheduled);
    assert!(after_client.client_joined_at.is_some());
    // Not live yet, so no live-start instant either
    assert!(after_client.live_since().is_none());

    let (after_therapist, started) =
        store.record_join(&session.id, ParticipantRole::Therapist).await.unwrap();
    assert!(started);
    assert_eq!(after_therapist.status, SessionStatus::InProgress);
    assert!(after_therapist.is_live());
    // The session went live on the second join
    assert_eq!(after_therapist.live_since(), after_therapist.therapist_joined_at);
}

#[tokio::test]
async fn no_transition_to_in_progress_before_payment() {
    let store = store().await;
    let start = Utc::now() + Duration::hours(1);
    let session = store
        .create("client-1", "therapist-1", start, start + Duration::minutes(50), SessionKind::Video)
        .await
        .unwrap();

    // Both participants join a pending_payment session: markers set, but the
    // status gate holds.
    store.record_join(&session.id, ParticipantRole::Client).await.unwrap();
    let (after, started) =
        store.record_join(&session.id, ParticipantRole::Therapist).await.unwrap();
    assert!(!started);
    assert_eq!(after.status, SessionStatus::PendingPayment);
    assert!(!after.is_live());
}

#[tokio::test]
async fn reconnect_keeps_first_join_marker() {
    let store = store().await;
    let session = scheduled_session(&store, 1).await;

    let (first, _) = store.record_join(&session.id, ParticipantRole::Client).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let (second, _) = store.record_join(&session.id, ParticipantRole::Client).await.unwrap();
    assert_eq!(first.client_joined_at, second.client_joined_at);
}

#[tokio::test]
async fn leave_never_changes_status() {
    let store = store().await;
    let session = scheduled_session(&store, 1).await;
    store.record_join(&session.id, ParticipantRole::Client).await.unwrap();
    store.record_join(&session.id, ParticipantRole::Therapist).await.unwrap();

    let after = store.record_leave(&session.id, ParticipantRole::Client).await.unwrap();
    assert_eq!(after.status, SessionStatus::InProgress);
    assert!(after.client_left_at.is_some());
    assert!(after.therapist_left_at.is_none());
}

#[tokio::test]
async fn cancel_inside_cutoff_is_refused() {
    // Scenario: cancel attempted 2 hours before start with a 24h cutoff
    let store = store().await;
    let session = scheduled_session(&store, 2).await;

    let result = store.cancel(&session.id, "client-1").await;
    assert!(matches!(result, Err(SessionError::StateConflict(_))));

    let unchanged = store.fetch(&session.id).await.unwrap();
    assert_eq!(unchanged.status, SessionStatus::Scheduled);
}

#[tokio::test]
async fn cancel_outside_cutoff_succeeds() {
    let store = store().await;
    let session = scheduled_session(&store, 48).await;

    let cancelled = store.cancel(&session.id, "client-1").await.unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert!(cancelled.status.is_terminal());
}

#[tokio::test]
async fn cancel_requires_a_participant() {
    let store = store().await;
    let session = scheduled_session(&store, 48).await;
    assert!(matches!(
        store.cancel(&session.id, "stranger").await,
        Err(SessionError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn reschedule_moves_times_but_not_status() {
    let store = store().await;
    let session = scheduled_session(&store, 48).await;

    let new_start = Utc::now() + Duration::hours(72);
    let moved = store
        .reschedule(&session.id, new_start, new_start + Duration::minutes(50), "therapist-1")
        .await
        .unwrap();
    assert_eq!(moved.status, SessionStatus::Scheduled);
    assert!((moved.scheduled_start - new_start).num_seconds().abs() <= 1);

    // Not permitted before payment
    let start = Utc::now() + Duration::hours(48);
    let unpaid = store
        .create("client-2", "therapist-1", start, start + Duration::minutes(50), SessionKind::Text)
        .await
        .unwrap();
    assert!(matches!(
        store.reschedule(&unpaid.id, new_start, new_start + Duration::minutes(50), "client-2").await,
        Err(SessionError::StateConflict(_))
    ));
}

#[tokio::test]
async fn terminal_transitions() {
    let store = store().await;

    let session = scheduled_session(&store, 1).await;
    store.record_join(&session.id, ParticipantRole::Client).await.unwrap();
    store.record_join(&session.id, ParticipantRole::Therapist).await.unwrap();
    let completed = store.complete(&session.id).await.unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    // No way back
    assert!(store.record_join(&session.id, ParticipantRole::Client).await.is_err());

    let missed = scheduled_session(&store, 1).await;
    let missed = store.mark_missed(&missed.id).await.unwrap();
    assert_eq!(missed.status, SessionStatus::Missed);
    assert!(store.complete(&missed.id).await.is_err());
}

#[tokio::test]
async fn summary_is_written_wholesale() {
    let store = store().await;
    let session = scheduled_session(&store, 1).await;

    let mut window = RollingWindow::new(30);
    for (i, v) in [0.1f32, 0.3, 0.5].iter().enumerate() {
        let probs = std::collections::HashMap::from([(EmotionLabel::Happy, 0.6 + v)]);
        window.push(EmotionSample::from_probabilities(i as f64, probs));
    }

    let summary = insight::build_summary(&window, 50);
    let stored = store.finalize_summary(&session.id, &summary).await.unwrap();
    let json = stored.summary_json.unwrap();
    assert!(json.contains("narrative"));

    // Regeneration overwrites, never merges
    let replacement = insight::build_summary(&window, 25);
    let stored = store.finalize_summary(&session.id, &replacement).await.unwrap();
    assert!(stored.summary_json.unwrap().contains("\"duration_minutes\":25"));
}

#[tokio::test]
async fn migrations_are_rerunnable_on_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("solace.db").display());
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();

    solace::db::run_migrations(&pool).await.unwrap();
    solace::db::run_migrations(&pool).await.unwrap();

    let store = SqliteSessionStore::new(pool);
    let session = {
        let start = Utc::now() + Duration::hours(48);
        store
            .create("client-1", "therapist-1", start, start + Duration::minutes(50), SessionKind::Video)
            .await
            .unwrap()
    };
    assert_eq!(store.fetch(&session.id).await.unwrap().status, SessionStatus::PendingPayment);
}

#[tokio::test]
async fn recording_reference_attaches() {
    let store = store().await;
    let session = scheduled_session(&store, 1).await;
    let updated =
        store.attach_recording(&session.id, "recordings/abc/clip.mp4").await.unwrap();
    assert_eq!(updated.recording_url.as_deref(), Some("recordings/abc/clip.mp4"));
}
