// src/chat/store.rs
//! Conversation message persistence. Sequence numbers are assigned with an
//! atomic counter upsert so two near-simultaneous senders can never read the
//! same max and collide.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::SessionResult;

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

pub struct MessageStore {
    pub pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomic increment-and-get of the per-conversation sequence counter.
    pub async fn next_sequence(&self, conversation_id: &str) -> SessionResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO conversation_counters (conversation_id, seq) VALUES (?, 1)
            ON CONFLICT(conversation_id) DO UPDATE SET seq = seq + 1
            RETURNING seq
            "#,
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("seq"))
    }

    pub async fn insert(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> SessionResult<StoredMessage> {
        let seq = self.next_sequence(conversation_id).await?;
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            seq,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO session_messages (id, conversation_id, sender_id, content, seq, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.seq)
        .bind(message.created_at.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    /// Most recent messages in sequence order, for reconnect backfill.
    pub async fn recent(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> SessionResult<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, sender_id, content, seq, created_at
            FROM session_messages
            WHERE conversation_id = ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<StoredMessage> = rows
            .iter()
            .map(|row| StoredMessage {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                sender_id: row.get("sender_id"),
                content: row.get("content"),
                seq: row.get("seq"),
                created_at: Utc.from_utc_datetime(&row.get::<NaiveDateTime, _>("created_at")),
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn sequence_numbers_are_monotonic_per_conversation() {
        let pool = memory_pool().await.unwrap();
        let store = MessageStore::new(pool);

        let a1 = store.insert("conv-a", "alice", "hello").await.unwrap();
        let a2 = store.insert("conv-a", "bob", "hi").await.unwrap();
        let b1 = store.insert("conv-b", "alice", "other room").await.unwrap();

        assert_eq!(a1.seq, 1);
        assert_eq!(a2.seq, 2);
        assert_eq!(b1.seq, 1);
    }

    #[tokio::test]
    async fn recent_returns_sequence_order() {
        let pool = memory_pool().await.unwrap();
        let store = MessageStore::new(pool);

        for i in 0..5 {
            store.insert("conv", "alice", &format!("msg {i}")).await.unwrap();
        }

        let recent = store.recent("conv", 3).await.unwrap();
        let seqs: Vec<i64> = recent.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }
}
