// src/api/ws/session.rs
// Per-participant connection orchestrator: role resolution, broadcast group
// membership, the inbound dispatch loop, and best-effort teardown.

use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::ws::connection::{CLOSE_ACCESS_DENIED, ConnectionContext, FrameGate, WsSender};
use crate::api::ws::heartbeat::HeartbeatTask;
use crate::api::ws::hub::SessionEvent;
use crate::api::ws::message::{RecordingAction, WsClientMessage, WsServerMessage};
use crate::config::CONFIG;
use crate::error::{SessionError, SessionResult};
use crate::identity;
use crate::insight::{self, ValenceTrend};
use crate::rtc;
use crate::session::types::ParticipantRole;
use crate::state::AppState;

/// WebSocket entry point. The authenticated principal arrives from upstream
/// auth middleware in `x-user-id`; the payload is never trusted for identity.
pub async fn ws_session_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(user_id) = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return (StatusCode::UNAUTHORIZED, "missing x-user-id").into_response();
    };

    info!("WebSocket upgrade for session {} by {}", session_id, user_id);
    ws.on_upgrade(move |socket| handle_session_socket(socket, state, session_id, user_id))
        .into_response()
}

async fn handle_session_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    user_id: String,
) {
    let (sink, mut receiver) = socket.split();
    let sender = WsSender::new(sink);

    // Fail closed: an unresolved role is the only condition that terminates
    // the connection. Distinct close code, no partial acceptance.
    let ctx = match resolve_connection(&state, &session_id, &user_id).await {
        Ok(ctx) => ctx,
        Err(e) => {
            warn!("Connection rejected for {} on session {}: {}", user_id, session_id, e);
            sender.close_with(CLOSE_ACCESS_DENIED, "not a session participant").await;
            return;
        }
    };
    info!("{} connected to session {} as {}", user_id, ctx.session_id, ctx.role.as_str());

    let mut group_rx = state.hub.join(&ctx.session_id).await;
    let peer_already_connected = state.hub.member_count(&ctx.session_id).await > 1;

    let mut started = false;
    let mut peer_present = peer_already_connected;
    match state.sessions.record_join(&ctx.session_id, ctx.role).await {
        Ok((session, started_now)) => {
            started = started_now;
            peer_present = peer_present || session.joined_at(ctx.role.other()).is_some();
        }
        Err(e) => {
            // Recoverable: the connection stays up even if the join marker
            // could not be written.
            warn!("record_join failed for session {}: {}", ctx.session_id, e);
            sender.send_error(format!("join not recorded: {e}"), e.code()).await;
        }
    }

    let established = WsServerMessage::ConnectionEstablished {
        session_id: ctx.session_id.clone(),
        role: ctx.role,
        peer_present,
    };
    if sender.send(&established).await.is_err() {
        disconnect(&state, &ctx).await;
        return;
    }

    state
        .hub
        .publish(
            &ctx.session_id,
            SessionEvent::except(
                &ctx.identity.user_id,
                WsServerMessage::UserStatus {
                    user_id: ctx.identity.user_id.clone(),
                    status: "joined".to_string(),
                    audio: None,
                    video: None,
                },
            ),
        )
        .await;

    if started {
        state
            .hub
            .publish(
                &ctx.session_id,
                SessionEvent::all(WsServerMessage::SessionStarted {
                    session_id: ctx.session_id.clone(),
                }),
            )
            .await;
    }

    // Forward group events addressed to this participant.
    let pump = {
        let sender = sender.clone();
        let user_id = ctx.identity.user_id.clone();
        let role = ctx.role;
        tokio::spawn(async move {
            loop {
                match group_rx.recv().await {
                    Ok(event) => {
                        if event.is_for(&user_id, role)
                            && sender.send(&event.message).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Broadcast receiver lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let heartbeat = HeartbeatTask::start(sender.clone());
    let mut frame_gate = FrameGate::new(CONFIG.frame_decimation);

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<WsClientMessage>(&text) {
                Ok(event) => {
                    // The single catch-and-report boundary: handler errors
                    // become an error event to this sender only, never a
                    // dropped connection.
                    if let Err(e) = dispatch(&state, &ctx, &sender, &mut frame_gate, event).await {
                        warn!("Handler error on session {}: {}", ctx.session_id, e);
                        sender.send_error(e.to_string(), e.code()).await;
                    }
                }
                Err(_) => match serde_json::from_str::<Value>(&text) {
                    Ok(original) => {
                        let tag = original.get("type").and_then(Value::as_str);
                        match tag {
                            // Known tag that failed to parse: malformed, not
                            // unknown
                            Some(tag) if WsClientMessage::is_known_tag(tag) => {
                                sender
                                    .send_error(
                                        format!("malformed {tag} message"),
                                        "PROTOCOL_ERROR",
                                    )
                                    .await;
                            }
                            // Unknown tag: echo it back so protocol drift is
                            // visible
                            _ => {
                                debug!(
                                    "Echoing unknown message type on session {}",
                                    ctx.session_id
                                );
                                let _ =
                                    sender.send(&WsServerMessage::Echo { original }).await;
                            }
                        }
                    }
                    Err(_) => {
                        sender.send_error("unparseable message", "PROTOCOL_ERROR").await;
                    }
                },
            },
            Ok(Message::Binary(_)) => {
                debug!("Binary message ignored on session {}", ctx.session_id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!("Close frame from {} on session {}", user_id, ctx.session_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error on session {}: {}", ctx.session_id, e);
                break;
            }
        }
    }

    heartbeat.abort();
    pump.abort();
    // The pump task owns this connection's broadcast receiver. Wait for the
    // abort to land before teardown reads the group's receiver count,
    // otherwise the group entry and the session window can outlive the last
    // connection.
    let _ = pump.await;
    disconnect(&state, &ctx).await;
    sender.close().await;
    info!("{} disconnected from session {}", user_id, ctx.session_id);
}

pub async fn resolve_connection(
    state: &Arc<AppState>,
    session_id: &str,
    user_id: &str,
) -> SessionResult<ConnectionContext> {
    let session = state.sessions.fetch(session_id).await?;
    let (role, identity) = identity::resolve_role(&session, user_id, &state.therapists).await?;
    let peer_user_id = match role {
        ParticipantRole::Client => session.therapist_id.clone(),
        ParticipantRole::Therapist => session.client_id.clone(),
    };
    Ok(ConnectionContext {
        session_id: session.id.clone(),
        identity,
        role,
        peer_user_id,
        channel: session.channel_name(),
        connected_at: Utc::now(),
    })
}

async fn dispatch(
    state: &Arc<AppState>,
    ctx: &ConnectionContext,
    sender: &WsSender,
    frame_gate: &mut FrameGate,
    event: WsClientMessage,
) -> SessionResult<()> {
    match event {
        WsClientMessage::ChatMessage { content } => handle_chat(state, ctx, content).await,
        WsClientMessage::MediaStatus { audio, video, typing, read_up_to } => {
            handle_media_status(state, ctx, audio, video, typing, read_up_to).await
        }
        WsClientMessage::EmotionData { frame } | WsClientMessage::VideoFrame { frame } => {
            handle_frame(state, ctx, frame_gate, frame)
        }
        WsClientMessage::ScreenShare { active } => {
            state
                .hub
                .publish(
                    &ctx.session_id,
                    SessionEvent::except(
                        &ctx.identity.user_id,
                        WsServerMessage::ScreenShare {
                            user_id: ctx.identity.user_id.clone(),
                            active,
                        },
                    ),
                )
                .await;
            Ok(())
        }
        WsClientMessage::SessionRecording { action } => {
            handle_recording(state, ctx, action).await
        }
        WsClientMessage::AgoraTokenRequest {} => handle_token_request(ctx, sender).await,
        WsClientMessage::Ping { ts } => {
            let reply =
                WsServerMessage::Pong { ts: ts.unwrap_or_else(|| Utc::now().timestamp_millis()) };
            if let Err(e) = sender.send(&reply).await {
                debug!("Failed to send pong: {}", e);
            }
            Ok(())
        }
    }
}

/// Persist first, then broadcast to the whole group including the sender (the
/// echo doubles as the delivery ack).
pub async fn handle_chat(
    state: &Arc<AppState>,
    ctx: &ConnectionContext,
    content: String,
) -> SessionResult<()> {
    let stored = state
        .messages
        .insert(&ctx.session_id, &ctx.identity.user_id, &content)
        .await?;

    state
        .hub
        .publish(
            &ctx.session_id,
            SessionEvent::all(WsServerMessage::ChatMessage {
                message_id: stored.id,
                sender_id: stored.sender_id,
                content: stored.content,
                seq: stored.seq,
                sent_at: stored.created_at.to_rfc3339(),
            }),
        )
        .await;
    Ok(())
}

pub async fn handle_media_status(
    state: &Arc<AppState>,
    ctx: &ConnectionContext,
    audio: Option<bool>,
    video: Option<bool>,
    typing: Option<bool>,
    read_up_to: Option<i64>,
) -> SessionResult<()> {
    let me = &ctx.identity.user_id;

    if let Some(active) = typing {
        state
            .hub
            .publish(
                &ctx.session_id,
                SessionEvent::except(
                    me,
                    WsServerMessage::TypingIndicator { user_id: me.clone(), active },
                ),
            )
            .await;
    }

    if let Some(up_to_seq) = read_up_to {
        state
            .hub
            .publish(
                &ctx.session_id,
                SessionEvent::except(
                    me,
                    WsServerMessage::ReadReceipt { user_id: me.clone(), up_to_seq },
                ),
            )
            .await;
    }

    if audio.is_some() || video.is_some() {
        state
            .hub
            .publish(
                &ctx.session_id,
                SessionEvent::except(
                    me,
                    WsServerMessage::UserStatus {
                        user_id: me.clone(),
                        status: "media".to_string(),
                        audio,
                        video,
                    },
                ),
            )
            .await;
    }

    Ok(())
}

/// Frames are accepted from the client role only, decimated, and analyzed off
/// the event loop. Analyzer output goes to the therapist connection, never
/// back to the client.
fn handle_frame(
    state: &Arc<AppState>,
    ctx: &ConnectionContext,
    frame_gate: &mut FrameGate,
    frame: String,
) -> SessionResult<()> {
    if ctx.role != ParticipantRole::Client {
        return Err(SessionError::authorization(
            "emotion frames are only accepted from the client",
        ));
    }

    if !frame_gate.admit() {
        return Ok(());
    }

    let connected_at = ctx.connected_at;
    let session_id = ctx.session_id.clone();
    let user_id = ctx.identity.user_id.clone();
    let sessions = state.sessions.clone();
    let analyzer = state.analyzer.clone();
    let windows = state.windows.clone();
    let hub = state.hub.clone();

    tokio::spawn(async move {
        // Sample timestamps are relative to the session going live, so the
        // trend regression's x-axis is shared across reconnects. Before the
        // session starts, this connection's start stands in.
        let base = sessions
            .fetch(&session_id)
            .await
            .ok()
            .and_then(|s| s.live_since())
            .unwrap_or(connected_at);
        let timestamp = (Utc::now() - base).num_milliseconds() as f64 / 1000.0;
        match analyzer.analyze(&frame, timestamp).await {
            Ok(sample) => {
                let pushed = windows.push(&session_id, sample.clone()).await;
                hub.publish(
                    &session_id,
                    SessionEvent::role(
                        ParticipantRole::Therapist,
                        WsServerMessage::EmotionUpdate { sample },
                    ),
                )
                .await;

                if pushed % CONFIG.trend_push_every.max(1) == 0 {
                    push_trend(&hub, &windows, &session_id).await;
                }
            }
            Err(e) if e.is_skip() => {
                debug!("No face in frame for session {}, skipping", session_id);
            }
            Err(e) => {
                warn!("Frame analysis failed for session {}: {}", session_id, e);
                hub.publish(
                    &session_id,
                    SessionEvent::user(
                        user_id,
                        WsServerMessage::Error {
                            message: e.to_string(),
                            code: "ANALYSIS_ERROR".to_string(),
                        },
                    ),
                )
                .await;
            }
        }
    });

    Ok(())
}

async fn push_trend(
    hub: &Arc<crate::api::ws::hub::SessionHub>,
    windows: &Arc<crate::analysis::WindowRegistry>,
    session_id: &str,
) {
    let Some(snapshot) = windows.snapshot(session_id).await else {
        return;
    };

    let stability = snapshot.stability;
    let trend = snapshot.valence_trend;
    let suggestions = insight::suggest(&snapshot);

    hub.publish(
        session_id,
        SessionEvent::role(
            ParticipantRole::Therapist,
            WsServerMessage::EmotionTrendUpdate { snapshot, suggestions },
        ),
    )
    .await;

    let warning = if trend == ValenceTrend::Deteriorating {
        Some("valence trend deteriorating")
    } else if stability < CONFIG.low_stability_threshold {
        Some("low emotional stability")
    } else {
        None
    };

    if let Some(reason) = warning {
        hub.publish(
            session_id,
            SessionEvent::role(
                ParticipantRole::Therapist,
                WsServerMessage::EmotionWarning {
                    reason: reason.to_string(),
                    stability,
                    valence_trend: trend,
                },
            ),
        )
        .await;
    }
}

/// Recording control is therapist-only; unauthorized attempts get an explicit
/// error reply and never touch recording state.
pub async fn handle_recording(
    state: &Arc<AppState>,
    ctx: &ConnectionContext,
    action: RecordingAction,
) -> SessionResult<()> {
    if ctx.role != ParticipantRole::Therapist {
        return Err(SessionError::authorization("recording control is therapist-only"));
    }

    match action {
        RecordingAction::Start => {
            let url = format!("recordings/{}/{}.mp4", ctx.session_id, Uuid::new_v4());
            state.sessions.attach_recording(&ctx.session_id, &url).await?;
            info!("Recording started for session {}", ctx.session_id);
            state
                .hub
                .publish(
                    &ctx.session_id,
                    SessionEvent::all(WsServerMessage::RecordingStatus {
                        active: true,
                        by: ctx.identity.user_id.clone(),
                        recording_url: Some(url),
                    }),
                )
                .await;
        }
        RecordingAction::Stop => {
            info!("Recording stopped for session {}", ctx.session_id);
            state
                .hub
                .publish(
                    &ctx.session_id,
                    SessionEvent::all(WsServerMessage::RecordingStatus {
                        active: false,
                        by: ctx.identity.user_id.clone(),
                        recording_url: None,
                    }),
                )
                .await;
        }
    }
    Ok(())
}

/// Credential synthesis is pure: no store writes, same output for the same
/// inputs and issue instant.
async fn handle_token_request(ctx: &ConnectionContext, sender: &WsSender) -> SessionResult<()> {
    let uid = rtc::numeric_uid(&ctx.identity.user_id);
    let credential = rtc::issue_credential(
        &CONFIG.rtc_app_id,
        &CONFIG.rtc_app_certificate,
        &ctx.channel,
        uid,
        ctx.role,
        CONFIG.rtc_token_ttl,
        Utc::now(),
    );

    let reply = WsServerMessage::AgoraToken {
        token: credential.token,
        channel: credential.channel,
        uid: credential.uid,
        rtc_role: credential.rtc_role.to_string(),
        expires_at: credential.expires_at,
    };
    if let Err(e) = sender.send(&reply).await {
        debug!("Failed to deliver RTC token: {}", e);
    }
    Ok(())
}

/// Best-effort teardown. Every step tolerates earlier failures; a connection
/// that got this far always has a fully-built context, so nothing here can
/// see partial state.
async fn disconnect(state: &Arc<AppState>, ctx: &ConnectionContext) {
    state
        .hub
        .publish(
            &ctx.session_id,
            SessionEvent::except(
                &ctx.identity.user_id,
                WsServerMessage::UserStatus {
                    user_id: ctx.identity.user_id.clone(),
                    status: "left".to_string(),
                    audio: None,
                    video: None,
                },
            ),
        )
        .await;

    if let Err(e) = state.sessions.record_leave(&ctx.session_id, ctx.role).await {
        warn!("record_leave failed for session {}: {}", ctx.session_id, e);
    }

    // The therapist leaving a live session closes the analytic loop: fold the
    // window into the final summary before the group winds down.
    if ctx.role == ParticipantRole::Therapist {
        finalize_if_live(state, ctx).await;
    }

    state.hub.leave(&ctx.session_id).await;
    if state.hub.member_count(&ctx.session_id).await == 0 {
        state.windows.remove(&ctx.session_id).await;
    }
}

async fn finalize_if_live(state: &Arc<AppState>, ctx: &ConnectionContext) {
    let session = match state.sessions.fetch(&ctx.session_id).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Could not fetch session {} for summary: {}", ctx.session_id, e);
            return;
        }
    };
    if !session.is_live() {
        return;
    }

    let Some(summary) =
        state.windows.summary(&ctx.session_id, session.duration_minutes()).await
    else {
        return;
    };

    match state.sessions.finalize_summary(&ctx.session_id, &summary).await {
        Ok(_) => {
            state
                .hub
                .publish(
                    &ctx.session_id,
                    SessionEvent::all(WsServerMessage::SessionSummary { summary }),
                )
                .await;
        }
        Err(e) => warn!("finalize_summary failed for session {}: {}", ctx.session_id, e),
    }
}
