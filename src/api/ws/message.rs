// src/api/ws/message.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::analysis::types::EmotionSample;
use crate::insight::{SessionSummary, Suggestion, TrendSnapshot, ValenceTrend};
use crate::session::types::ParticipantRole;

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum WsClientMessage {
    #[serde(rename = "chat_message")]
    ChatMessage { content: String },

    #[serde(rename = "media_status")]
    MediaStatus {
        #[serde(default)]
        audio: Option<bool>,
        #[serde(default)]
        video: Option<bool>,
        #[serde(default)]
        typing: Option<bool>,
        #[serde(default)]
        read_up_to: Option<i64>,
    },

    /// Inline data-URL still image from the client's camera.
    #[serde(rename = "emotion_data")]
    EmotionData { frame: String },

    /// Same payload on the raw video-frame channel; both are decimated and
    /// analyzed identically.
    #[serde(rename = "video_frame")]
    VideoFrame { frame: String },

    #[serde(rename = "screen_share")]
    ScreenShare { active: bool },

    #[serde(rename = "session_recording")]
    SessionRecording { action: RecordingAction },

    #[serde(rename = "agora_token_request")]
    AgoraTokenRequest {},

    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        ts: Option<i64>,
    },
}

impl WsClientMessage {
    /// Tags the dispatch loop understands. A message with one of these tags
    /// that still fails to parse is malformed, not unknown, and gets a
    /// protocol error instead of an echo.
    pub const KNOWN_TAGS: [&'static str; 8] = [
        "chat_message",
        "media_status",
        "emotion_data",
        "video_frame",
        "screen_share",
        "session_recording",
        "agora_token_request",
        "ping",
    ];

    pub fn is_known_tag(tag: &str) -> bool {
        Self::KNOWN_TAGS.contains(&tag)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordingAction {
    Start,
    Stop,
}

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type")]
pub enum WsServerMessage {
    #[serde(rename = "connection_established")]
    ConnectionEstablished {
        session_id: String,
        role: ParticipantRole,
        peer_present: bool,
    },

    #[serde(rename = "session_started")]
    SessionStarted { session_id: String },

    #[serde(rename = "chat_message")]
    ChatMessage {
        message_id: String,
        sender_id: String,
        content: String,
        seq: i64,
        sent_at: String,
    },

    #[serde(rename = "typing_indicator")]
    TypingIndicator { user_id: String, active: bool },

    #[serde(rename = "read_receipt")]
    ReadReceipt { user_id: String, up_to_seq: i64 },

    #[serde(rename = "user_status")]
    UserStatus {
        user_id: String,
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        video: Option<bool>,
    },

    #[serde(rename = "screen_share")]
    ScreenShare { user_id: String, active: bool },

    #[serde(rename = "emotion_update")]
    EmotionUpdate { sample: EmotionSample },

    #[serde(rename = "emotion_trend_update")]
    EmotionTrendUpdate {
        snapshot: TrendSnapshot,
        suggestions: Vec<Suggestion>,
    },

    #[serde(rename = "emotion_warning")]
    EmotionWarning {
        reason: String,
        stability: f32,
        valence_trend: ValenceTrend,
    },

    #[serde(rename = "session_summary")]
    SessionSummary { summary: SessionSummary },

    #[serde(rename = "recording_status")]
    RecordingStatus {
        active: bool,
        by: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        recording_url: Option<String>,
    },

    #[serde(rename = "agora_token")]
    AgoraToken {
        token: String,
        channel: String,
        uid: u32,
        rtc_role: String,
        expires_at: i64,
    },

    /// Unknown inbound tags come back as echoes, never silent drops; protocol
    /// drift should be visible to the client.
    #[serde(rename = "echo")]
    Echo { original: Value },

    #[serde(rename = "error")]
    Error { message: String, code: String },

    #[serde(rename = "pong")]
    Pong { ts: i64 },
}
