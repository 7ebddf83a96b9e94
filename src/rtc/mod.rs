// src/rtc/mod.rs
//! Short-lived media-transport credentials for the external RTC provider.
//! Pure functions of (app credentials, channel, uid, role, ttl, now): no
//! store access, no side effects, idempotent for a fixed issue time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::session::types::ParticipantRole;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RtcCredential {
    pub token: String,
    pub channel: String,
    pub uid: u32,
    pub rtc_role: &'static str,
    pub expires_at: i64,
}

/// Stable numeric uid for the RTC provider, derived from the user id.
pub fn numeric_uid(user_id: &str) -> u32 {
    let digest = Sha256::digest(user_id.as_bytes());
    // Avoid uid 0: some providers treat it as "auto-assign"
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) | 1
}

fn rtc_role(role: ParticipantRole) -> &'static str {
    match role {
        ParticipantRole::Therapist => "host",
        ParticipantRole::Client => "publisher",
    }
}

pub fn issue_credential(
    app_id: &str,
    app_certificate: &str,
    channel: &str,
    uid: u32,
    role: ParticipantRole,
    ttl_secs: u64,
    now: DateTime<Utc>,
) -> RtcCredential {
    let expires_at = now.timestamp() + ttl_secs as i64;
    let role_str = rtc_role(role);

    let mut hasher = Sha256::new();
    hasher.update(app_id.as_bytes());
    hasher.update(app_certificate.as_bytes());
    hasher.update(channel.as_bytes());
    hasher.update(uid.to_be_bytes());
    hasher.update(role_str.as_bytes());
    hasher.update(expires_at.to_be_bytes());
    let signature = hasher.finalize();

    let hex: String = signature.iter().map(|b| format!("{b:02x}")).collect();
    RtcCredential {
        token: format!("{app_id}.{expires_at}.{hex}"),
        channel: channel.to_string(),
        uid,
        rtc_role: role_str,
        expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_is_deterministic_for_fixed_time() {
        let now = Utc::now();
        let a = issue_credential("app", "cert", "session-1", 42, ParticipantRole::Client, 3600, now);
        let b = issue_credential("app", "cert", "session-1", 42, ParticipantRole::Client, 3600, now);
        assert_eq!(a, b);
    }

    #[test]
    fn credential_varies_by_inputs() {
        let now = Utc::now();
        let base = issue_credential("app", "cert", "session-1", 42, ParticipantRole::Client, 3600, now);
        let other_channel =
            issue_credential("app", "cert", "session-2", 42, ParticipantRole::Client, 3600, now);
        let other_role =
            issue_credential("app", "cert", "session-1", 42, ParticipantRole::Therapist, 3600, now);
        assert_ne!(base.token, other_channel.token);
        assert_ne!(base.token, other_role.token);
        assert_eq!(base.expires_at, now.timestamp() + 3600);
    }

    #[test]
    fn numeric_uid_is_stable_and_nonzero() {
        assert_eq!(numeric_uid("user-7"), numeric_uid("user-7"));
        assert_ne!(numeric_uid("user-7"), numeric_uid("user-8"));
        assert_ne!(numeric_uid(""), 0);
    }
}
