//! SQL access for directory room records.

use serde::de::DeserializeOwned;
use sqlx::SqlitePool;

use super::room::{LastMessage, ParticipantData, Room, RoomId};

type RoomRow = (String, String, Option<String>, i64, i64, i64, Option<String>);

const SELECT_ROOM: &str = "SELECT id, participants, participant_data, created_at, last_activity, connections, last_message FROM rooms";

pub(crate) struct RoomStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RoomStore<'a> {
    pub(crate) fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the record unless one with the same id exists. Returns whether it was inserted.
    pub(crate) async fn insert_if_absent(&self, room: &Room) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO rooms (id, participants, participant_data, created_at, last_activity, connections, last_message)
            VALUES (?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(room.id.as_str())
        .bind(encode(&room.participants)?)
        .bind(room.participant_data.as_ref().map(encode).transpose()?)
        .bind(room.created_at)
        .bind(room.last_activity)
        .bind(room.connections)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fills in participant data on a record that has none.
    pub(crate) async fn backfill_participant_data(
        &self,
        id: &RoomId,
        data: &ParticipantData,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE rooms SET participant_data = ? WHERE id = ? AND participant_data IS NULL",
        )
        .bind(encode(data)?)
        .bind(id.as_str())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub(crate) async fn find(&self, id: &RoomId) -> Result<Option<Room>, sqlx::Error> {
        let row: Option<RoomRow> = sqlx::query_as(&format!("{SELECT_ROOM} WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(self.pool)
            .await?;

        row.map(decode_room).transpose()
    }

    pub(crate) async fn list_for_user(&self, user_id: &str) -> Result<Vec<Room>, sqlx::Error> {
        let rows: Vec<RoomRow> = sqlx::query_as(&format!(
            "{SELECT_ROOM} WHERE EXISTS (SELECT 1 FROM json_each(rooms.participants) WHERE json_each.value = ?)"
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(decode_room).collect()
    }

    pub(crate) async fn activity(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as("SELECT id, last_activity FROM rooms")
            .fetch_all(self.pool)
            .await
    }

    /// Adds `delta` to the connection count, never going below zero.
    pub(crate) async fn adjust_connections(
        &self,
        id: &RoomId,
        delta: i64,
        touched_at: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE rooms
            SET connections = MAX(0, connections + ?),
                last_activity = COALESCE(?, last_activity)
            WHERE id = ?
            "#,
        )
        .bind(delta)
        .bind(touched_at)
        .bind(id.as_str())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub(crate) async fn set_last_message(
        &self,
        id: &RoomId,
        preview: &LastMessage,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE rooms SET last_message = ?, last_activity = MAX(last_activity, ?) WHERE id = ?",
        )
        .bind(encode(preview)?)
        .bind(preview.at)
        .bind(id.as_str())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub(crate) async fn delete(&self, id: &RoomId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = ?")
            .bind(id.as_str())
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub(crate) async fn delete_empty(&self) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM rooms WHERE connections = 0 AND last_message IS NULL")
                .execute(self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    pub(crate) async fn delete_test_rooms(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM rooms WHERE EXISTS (SELECT 1 FROM json_each(rooms.participants) WHERE json_each.value LIKE 'test%')",
        )
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, sqlx::Error> {
    serde_json::to_string(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn decode_room(
    (id, participants, participant_data, created_at, last_activity, connections, last_message): RoomRow,
) -> Result<Room, sqlx::Error> {
    Ok(Room {
        id: RoomId::from(id),
        participants: decode(&participants)?,
        participant_data: participant_data.as_deref().map(decode).transpose()?,
        last_activity,
        created_at,
        connections,
        last_message: last_message.as_deref().map(decode).transpose()?,
    })
}
