// src/db.rs
//! Schema migrations for SQLite. Run at startup to guarantee compatibility.

use anyhow::Result;
use sqlx::{Executor, SqlitePool};

const CREATE_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    therapist_id TEXT NOT NULL,
    scheduled_start DATETIME NOT NULL,
    scheduled_end DATETIME NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('video', 'voice', 'text')),
    status TEXT NOT NULL,
    client_joined_at DATETIME,
    therapist_joined_at DATETIME,
    client_left_at DATETIME,
    therapist_left_at DATETIME,
    recording_url TEXT,
    summary_json TEXT,
    created_at DATETIME NOT NULL
);
"#;

const CREATE_THERAPIST_PROFILES: &str = r#"
CREATE TABLE IF NOT EXISTS therapist_profiles (
    profile_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

const CREATE_SESSION_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS session_messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    content TEXT NOT NULL,
    seq INTEGER NOT NULL,
    created_at DATETIME NOT NULL
);
"#;

const CREATE_CONVERSATION_COUNTERS: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_counters (
    conversation_id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL
);
"#;

const CREATE_INDICES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_sessions_client ON sessions(client_id);
CREATE INDEX IF NOT EXISTS idx_sessions_therapist ON sessions(therapist_id);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON session_messages(conversation_id, seq);
"#;

/// Apply all migrations. Safe to call repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(CREATE_SESSIONS).await?;
    pool.execute(CREATE_THERAPIST_PROFILES).await?;
    pool.execute(CREATE_SESSION_MESSAGES).await?;
    pool.execute(CREATE_CONVERSATION_COUNTERS).await?;
    pool.execute(CREATE_INDICES).await?;
    Ok(())
}

/// In-memory pool for tests. Single connection so every query sees the same
/// database.
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
