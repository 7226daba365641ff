//! HTTP client for the room directory API.

use reqwest::{Client, Url};

use crate::directory::{
    CreateOutcome, LastMessage, ParticipantData, Room, RoomId,
};
use crate::error::ChatError;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    participants: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    participant_data: Option<&'a ParticipantData>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LastMessageBody<'a> {
    room_id: &'a RoomId,
    last_message: &'a LastMessage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomBody<'a> {
    room_id: &'a RoomId,
}

#[derive(Deserialize)]
struct RoomList {
    rooms: Vec<Room>,
}

#[derive(Deserialize)]
struct Sweep {
    deleted: u64,
}

#[derive(Clone, Debug)]
pub struct DirectoryClient {
    http: Client,
    base: Url,
}

impl DirectoryClient {
    /// `base` is the server root, e.g. `http://localhost:8080/`.
    pub fn new(base: Url) -> Self {
        Self {
            http: Client::new(),
            base,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        self.base
            .join(&format!("api/rooms{path}"))
            .map_err(|e| ChatError::Url(e.to_string()))
    }

    pub async fn create_or_get_room(
        &self,
        participants: &[String],
        participant_data: Option<&ParticipantData>,
    ) -> Result<CreateOutcome, ChatError> {
        Ok(self
            .http
            .post(self.endpoint("/create")?)
            .json(&CreateBody {
                participants,
                participant_data,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    pub async fn list_rooms(&self, user_id: &str) -> Result<Vec<Room>, ChatError> {
        let list: RoomList = self
            .http
            .get(self.endpoint("/rooms")?)
            .query(&[("userId", user_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(list.rooms)
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>, ChatError> {
        let response = self
            .http
            .get(self.endpoint("/room")?)
            .query(&[("roomId", room_id.as_str())])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json().await?))
    }

    pub async fn update_last_message(
        &self,
        room_id: &RoomId,
        last_message: &LastMessage,
    ) -> Result<(), ChatError> {
        self.http
            .post(self.endpoint("/updateLastMessage")?)
            .json(&LastMessageBody {
                room_id,
                last_message,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn delete_room(&self, room_id: &RoomId) -> Result<bool, ChatError> {
        let body: Value = self
            .http
            .delete(self.endpoint("")?)
            .query(&[("action", "deleteRoom")])
            .json(&RoomBody { room_id })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body["deleted"].as_bool().unwrap_or(false))
    }

    pub async fn cleanup_empty_rooms(&self) -> Result<u64, ChatError> {
        self.sweep("cleanupEmptyRooms").await
    }

    pub async fn cleanup_test_rooms(&self) -> Result<u64, ChatError> {
        self.sweep("cleanupTestRooms").await
    }

    async fn sweep(&self, action: &str) -> Result<u64, ChatError> {
        let sweep: Sweep = self
            .http
            .delete(self.endpoint("")?)
            .query(&[("action", action)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(sweep.deleted)
    }
}
