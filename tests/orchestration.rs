// tests/orchestration.rs
// Connection-orchestrator behavior driven through the handler layer: role
// resolution, session-start fan-out, chat relay and recording authorization.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use solace::analysis::{EmotionLabel, FixedClassifier};
use solace::api::ws::hub::{Audience, SessionEvent};
use solace::api::ws::message::{RecordingAction, WsServerMessage};
use solace::api::ws::session::{
    handle_chat, handle_media_status, handle_recording, resolve_connection,
};
use solace::db::memory_pool;
use solace::error::SessionError;
use solace::session::{ParticipantRole, SessionKind, SessionStatus};
use solace::state::AppState;

const CLIENT: &str = "client-1";
const THERAPIST_PROFILE: &str = "prof-1";
const THERAPIST_USER: &str = "tuser-1";

async fn test_state() -> Arc<AppState> {
    let pool = memory_pool().await.unwrap();
    let probs: HashMap<EmotionLabel, f32> = [(EmotionLabel::Happy, 0.8)].into_iter().collect();
    let state = Arc::new(AppState::new(pool, Arc::new(FixedClassifier::new(probs))));
    state.therapists.register(THERAPIST_PROFILE, THERAPIST_USER).await.unwrap();
    state
}

async fn scheduled_session(state: &Arc<AppState>) -> String {
    let start = Utc::now() + Duration::hours(1);
    let session = state
        .sessions
        .create(CLIENT, THERAPIST_PROFILE, start, start + Duration::minutes(50), SessionKind::Video)
        .await
        .unwrap();
    state.sessions.confirm_payment(&session.id).await.unwrap();
    session.id
}

#[tokio::test]
async fn role_resolution_is_deterministic() {
    let state = test_state().await;
    let session_id = scheduled_session(&state).await;

    let client_ctx = resolve_connection(&state, &session_id, CLIENT).await.unwrap();
    assert_eq!(client_ctx.role, ParticipantRole::Client);
    assert_eq!(client_ctx.peer_user_id, THERAPIST_PROFILE);
    assert_eq!(client_ctx.channel, format!("session-{session_id}"));

    // Therapist authenticating with the profile id directly
    let direct = resolve_connection(&state, &session_id, THERAPIST_PROFILE).await.unwrap();
    assert_eq!(direct.role, ParticipantRole::Therapist);

    // Therapist authenticating with the login user account: resolved through
    // the directory to the same role
    let via_directory = resolve_connection(&state, &session_id, THERAPIST_USER).await.unwrap();
    assert_eq!(via_directory.role, ParticipantRole::Therapist);
    assert_eq!(via_directory.identity.profile_id.as_deref(), Some(THERAPIST_PROFILE));
    assert_eq!(via_directory.peer_user_id, CLIENT);

    // Same inputs, same outcome
    let again = resolve_connection(&state, &session_id, THERAPIST_USER).await.unwrap();
    assert_eq!(again.role, via_directory.role);
    assert_eq!(again.identity, via_directory.identity);
}

#[tokio::test]
async fn unrelated_user_fails_closed() {
    let state = test_state().await;
    let session_id = scheduled_session(&state).await;

    let result = resolve_connection(&state, &session_id, "stranger-9").await;
    assert!(matches!(result, Err(SessionError::AccessDenied(_))));

    let missing = resolve_connection(&state, "no-such-session", CLIENT).await;
    assert!(matches!(missing, Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn second_join_starts_the_session_for_everyone() {
    let state = test_state().await;
    let session_id = scheduled_session(&state).await;

    let mut client_rx = state.hub.join(&session_id).await;
    let mut therapist_rx = state.hub.join(&session_id).await;

    // First joiner: no start yet
    let (_, started) =
        state.sessions.record_join(&session_id, ParticipantRole::Client).await.unwrap();
    assert!(!started);

    // Second joiner flips the session live; the orchestrator then broadcasts
    // session_started to the whole group
    let (session, started) =
        state.sessions.record_join(&session_id, ParticipantRole::Therapist).await.unwrap();
    assert!(started);
    assert_eq!(session.status, SessionStatus::InProgress);

    state
        .hub
        .publish(
            &session_id,
            SessionEvent::all(WsServerMessage::SessionStarted { session_id: session_id.clone() }),
        )
        .await;

    for rx in [&mut client_rx, &mut therapist_rx] {
        let event = rx.recv().await.unwrap();
        assert!(event.is_for(CLIENT, ParticipantRole::Client));
        assert!(event.is_for(THERAPIST_USER, ParticipantRole::Therapist));
        assert!(matches!(event.message, WsServerMessage::SessionStarted { .. }));
    }
}

#[tokio::test]
async fn group_cleanup_sees_the_aborted_forwarder_receiver_dropped() {
    // The last connection's teardown drops the broadcast group and the
    // session window only when the receiver count reads zero. The forwarder
    // task owns the receiver, so teardown must await the aborted task before
    // counting; this pins that ordering.
    let state = test_state().await;
    let session_id = scheduled_session(&state).await;

    let rx = state.hub.join(&session_id).await;
    let forwarder = tokio::spawn(async move {
        let mut rx = rx;
        while rx.recv().await.is_ok() {}
    });
    assert_eq!(state.hub.member_count(&session_id).await, 1);

    forwarder.abort();
    // Awaiting the handle guarantees the task, and with it the receiver, is
    // gone before the counts below are read
    let _ = forwarder.await;

    state.hub.leave(&session_id).await;
    assert_eq!(state.hub.member_count(&session_id).await, 0);

    state.windows.remove(&session_id).await;
    assert_eq!(state.windows.sample_count(&session_id).await, 0);

    // A fresh join builds a new group rather than reviving a leaked one
    let _rx = state.hub.join(&session_id).await;
    assert_eq!(state.hub.member_count(&session_id).await, 1);
}

#[tokio::test]
async fn chat_persists_then_reaches_the_whole_group() {
    let state = test_state().await;
    let session_id = scheduled_session(&state).await;
    let ctx = resolve_connection(&state, &session_id, CLIENT).await.unwrap();

    let mut client_rx = state.hub.join(&session_id).await;
    let mut therapist_rx = state.hub.join(&session_id).await;

    handle_chat(&state, &ctx, "hello there".to_string()).await.unwrap();

    // Persisted with its sequence number before any broadcast
    let stored = state.messages.recent(&session_id, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].seq, 1);
    assert_eq!(stored[0].sender_id, CLIENT);

    // Delivered to everyone, sender included (the echo is the delivery ack)
    for (rx, user, role) in [
        (&mut client_rx, CLIENT, ParticipantRole::Client),
        (&mut therapist_rx, THERAPIST_USER, ParticipantRole::Therapist),
    ] {
        let event = rx.recv().await.unwrap();
        assert!(event.is_for(user, role));
        match event.message {
            WsServerMessage::ChatMessage { content, seq, sender_id, .. } => {
                assert_eq!(content, "hello there");
                assert_eq!(seq, 1);
                assert_eq!(sender_id, CLIENT);
            }
            other => panic!("expected chat_message, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn typing_indicator_skips_the_sender() {
    let state = test_state().await;
    let session_id = scheduled_session(&state).await;
    let ctx = resolve_connection(&state, &session_id, CLIENT).await.unwrap();

    let mut rx = state.hub.join(&session_id).await;
    handle_media_status(&state, &ctx, None, None, Some(true), None).await.unwrap();

    let event = rx.recv().await.unwrap();
    assert!(matches!(event.audience, Audience::ExceptUser(_)));
    assert!(!event.is_for(CLIENT, ParticipantRole::Client));
    assert!(event.is_for(THERAPIST_USER, ParticipantRole::Therapist));
    match event.message {
        WsServerMessage::TypingIndicator { user_id, active } => {
            assert_eq!(user_id, CLIENT);
            assert!(active);
        }
        other => panic!("expected typing_indicator, got {other:?}"),
    }
}

#[tokio::test]
async fn recording_control_is_therapist_only() {
    let state = test_state().await;
    let session_id = scheduled_session(&state).await;

    // Client attempt: explicit authorization error, recording state untouched
    let client_ctx = resolve_connection(&state, &session_id, CLIENT).await.unwrap();
    let denied =
        handle_recording(&state, &client_ctx, RecordingAction::Start).await.unwrap_err();
    assert_eq!(denied.code(), "AUTHORIZATION_ERROR");
    assert!(matches!(denied, SessionError::Authorization(_)));
    assert!(state.sessions.fetch(&session_id).await.unwrap().recording_url.is_none());

    // Therapist attempt: recording attaches and the whole group hears it
    let mut rx = state.hub.join(&session_id).await;
    let therapist_ctx =
        resolve_connection(&state, &session_id, THERAPIST_USER).await.unwrap();
    handle_recording(&state, &therapist_ctx, RecordingAction::Start).await.unwrap();

    let url = state.sessions.fetch(&session_id).await.unwrap().recording_url;
    assert!(url.as_deref().unwrap().starts_with(&format!("recordings/{session_id}/")));

    let event = rx.recv().await.unwrap();
    assert!(event.is_for(CLIENT, ParticipantRole::Client));
    match event.message {
        WsServerMessage::RecordingStatus { active, by, recording_url } => {
            assert!(active);
            assert_eq!(by, THERAPIST_USER);
            assert_eq!(recording_url, url);
        }
        other => panic!("expected recording_status, got {other:?}"),
    }

    // Stop broadcasts without clearing the stored reference
    handle_recording(&state, &therapist_ctx, RecordingAction::Stop).await.unwrap();
    let event = rx.recv().await.unwrap();
    assert!(matches!(
        event.message,
        WsServerMessage::RecordingStatus { active: false, .. }
    ));
    assert!(state.sessions.fetch(&session_id).await.unwrap().recording_url.is_some());
}
