//! Durable storage of room logs. Each room's full log is one row, rewritten on every mutation.

use crate::clock::now_millis;
use crate::db::Database;
use crate::directory::RoomId;
use crate::error::ChatError;
use crate::protocol::ChatMessage;

#[derive(Clone, Debug)]
pub struct LogStore {
    db: Database,
}

impl LogStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn load(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, ChatError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT messages FROM room_logs WHERE room_id = ?")
            .bind(room_id.as_str())
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some((raw,)) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save(&self, room_id: &RoomId, messages: &[ChatMessage]) -> Result<(), ChatError> {
        let raw = serde_json::to_string(messages)?;
        sqlx::query(
            r#"
            INSERT INTO room_logs (room_id, messages, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(room_id) DO UPDATE SET messages = excluded.messages, updated_at = excluded.updated_at
            "#,
        )
        .bind(room_id.as_str())
        .bind(raw)
        .bind(now_millis())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Every stored log with the time it was last written.
    pub async fn last_updates(&self) -> Result<Vec<(RoomId, i64)>, ChatError> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT room_id, updated_at FROM room_logs")
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.into_iter().map(|(id, at)| (RoomId::from(id), at)).collect())
    }

    pub async fn purge(&self, room_id: &RoomId) -> Result<(), ChatError> {
        sqlx::query("DELETE FROM room_logs WHERE room_id = ?")
            .bind(room_id.as_str())
            .execute(self.db.pool())
            .await?;

        Ok(())
    }
}
