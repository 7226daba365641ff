use axum::{
    body::Bytes, debug_handler, extract::{Query, State}, routing::{get, post}, Json, Router
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{error::DirectoryError, AppResult, AppState};

use super::{CreateOutcome, Directory, LastMessage, ParticipantData, Room, RoomId, Sweep};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", axum::routing::delete(delete_action))
        .route("/create", post(create))
        .route("/rooms", get(rooms))
        .route("/room", get(room))
        .route("/updateLastMessage", post(update_last_message))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomBody {
    pub participants: Vec<String>,
    #[serde(default)]
    pub participant_data: Option<ParticipantData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserQuery {
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoomQuery {
    room_id: RoomId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLastMessageBody {
    pub room_id: RoomId,
    pub last_message: LastMessage,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRoomBody {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum DeleteAction {
    DeleteRoom,
    CleanupEmptyRooms,
    CleanupTestRooms,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionQuery {
    action: DeleteAction,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomList {
    pub rooms: Vec<Room>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    State(directory): State<Directory>,
    Json(CreateRoomBody { participants, participant_data }): Json<CreateRoomBody>,
) -> AppResult<Json<CreateOutcome>> {
    Ok(Json(
        directory
            .create_or_get_room(participants, participant_data)
            .await?,
    ))
}

#[debug_handler(state = AppState)]
pub(crate) async fn rooms(
    State(directory): State<Directory>,
    Query(UserQuery { user_id }): Query<UserQuery>,
) -> AppResult<Json<RoomList>> {
    let rooms = directory.list_rooms_for_user(&user_id).await?;
    Ok(Json(RoomList { rooms }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn room(
    State(directory): State<Directory>,
    Query(RoomQuery { room_id }): Query<RoomQuery>,
) -> AppResult<Json<Room>> {
    Ok(Json(directory.get_room(&room_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn update_last_message(
    State(directory): State<Directory>,
    Json(UpdateLastMessageBody { room_id, last_message }): Json<UpdateLastMessageBody>,
) -> AppResult<Json<Value>> {
    directory
        .update_last_message_preview(&room_id, &last_message)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_action(
    State(directory): State<Directory>,
    Query(ActionQuery { action }): Query<ActionQuery>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    match action {
        DeleteAction::DeleteRoom => {
            if body.is_empty() {
                return Err(DirectoryError::MissingBody("deleteRoom").into());
            }
            let DeleteRoomBody { room_id } =
                serde_json::from_slice(&body).map_err(DirectoryError::Codec)?;
            let deleted = directory.delete_room(&room_id).await?;
            Ok(Json(json!({ "ok": true, "deleted": deleted })))
        }
        DeleteAction::CleanupEmptyRooms => {
            let deleted = directory.cleanup(Sweep::EmptyRooms).await?;
            Ok(Json(json!({ "deleted": deleted })))
        }
        DeleteAction::CleanupTestRooms => {
            let deleted = directory.cleanup(Sweep::TestRooms).await?;
            Ok(Json(json!({ "deleted": deleted })))
        }
    }
}
