//! SQLite [`HistoryStore`] over the `chat_messages` table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sqlx::{Row, SqlitePool};

use salesbot_core::history::HistoryStore;
use salesbot_core::models::{ConversationTurn, Sender};

/// Rendering used for every timestamp returned to clients.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %I:%M:%S %p";

pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored turns for a session.
    pub async fn count(&self, session_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn append(
        &self,
        session_id: &str,
        sender: Sender,
        message: &str,
    ) -> Result<ConversationTurn> {
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO chat_messages (session_id, sender, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(sender.as_str())
        .bind(message)
        .bind(created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(ConversationTurn {
            session_id: session_id.to_string(),
            sender,
            message: message.to_string(),
            created_at,
        })
    }

    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT sender, message, created_at FROM chat_messages
            WHERE session_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let sender: String = row.get("sender");
            let millis: i64 = row.get("created_at");
            turns.push(ConversationTurn {
                session_id: session_id.to_string(),
                sender: sender.parse()?,
                message: row.get("message"),
                created_at: DateTime::from_timestamp_millis(millis)
                    .with_context(|| format!("invalid stored timestamp {}", millis))?,
            });
        }
        Ok(turns)
    }
}

/// Render a turn timestamp in the configured zone.
pub fn format_timestamp(ts: &DateTime<Utc>, offset: &FixedOffset) -> String {
    ts.with_timezone(offset).format(TIMESTAMP_FORMAT).to_string()
}
