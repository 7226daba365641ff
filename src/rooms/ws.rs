use axum::{
    debug_handler,
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::directory::RoomId;
use crate::protocol::{ClientFrame, Profile, ServerFrame};

use super::{RoomEvent, RoomHandle, SessionRegistry};

/// Close code sent when the connection carries no usable identity.
pub const AUTH_REQUIRED_CODE: u16 = 4001;

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectQuery {
    /// JSON-encoded [`Profile`] of the caller.
    user: Option<String>,
}

/// Lifecycle of one socket. The read loop forwards frames to the room only while `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unauthenticated,
    Authenticated,
    Active,
    Closed,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<String>,
    Query(ConnectQuery { user }): Query<ConnectQuery>,
    State(sessions): State<SessionRegistry>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room_id = RoomId::from(room_id);
    let identity = user.as_deref().and_then(parse_identity);

    ws.on_upgrade(async move |socket| {
        let mut phase = Phase::Unauthenticated;
        let Some(user) = identity else {
            reject(socket, &room_id).await;
            return;
        };
        advance(&mut phase, Phase::Authenticated, &room_id);

        serve(socket, sessions.handle(&room_id), user, phase).await;
    })
}

fn parse_identity(raw: &str) -> Option<Profile> {
    match serde_json::from_str::<Profile>(raw) {
        Ok(profile) if !profile.id.trim().is_empty() => Some(profile),
        Ok(_) => None,
        Err(err) => {
            debug!(error = %err, "unreadable identity blob");
            None
        }
    }
}

fn advance(phase: &mut Phase, next: Phase, room_id: &RoomId) {
    debug!(room_id = %room_id, from = ?phase, to = ?next, "connection phase");
    *phase = next;
}

async fn reject(mut socket: WebSocket, room_id: &RoomId) {
    warn!(room_id = %room_id, "connection without identity");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: AUTH_REQUIRED_CODE,
            reason: Utf8Bytes::from_static("authentication required"),
        })))
        .await;
}

async fn serve(socket: WebSocket, room: RoomHandle, user: Profile, mut phase: Phase) {
    let room_id = room.room_id().clone();
    let conn_id = Uuid::now_v7();
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let connect = RoomEvent::Connect {
        conn_id,
        user: user.clone(),
        outbound,
    };
    if let Err(err) = room.send(connect).await {
        warn!(room_id = %room_id, error = %err, "room session unavailable");
        return;
    }
    advance(&mut phase, Phase::Active, &room_id);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    error!(error = %err, "failed to encode server frame");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while phase == Phase::Active {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(frame) => {
                        let event = RoomEvent::Frame {
                            conn_id,
                            user: user.clone(),
                            frame,
                        };
                        if room.send(event).await.is_err() {
                            advance(&mut phase, Phase::Closed, &room_id);
                        }
                    }
                    Err(err) => {
                        error!(room_id = %room_id, %conn_id, error = %err, "unrecognized frame dropped");
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    warn!(room_id = %room_id, %conn_id, "binary frame dropped");
                }
                Some(Ok(Message::Close(_))) | None => advance(&mut phase, Phase::Closed, &room_id),
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(room_id = %room_id, %conn_id, error = %err, "socket error");
                    advance(&mut phase, Phase::Closed, &room_id);
                }
            },
            _ = &mut writer => advance(&mut phase, Phase::Closed, &room_id),
        }
    }

    let _ = room.send(RoomEvent::Disconnect { conn_id }).await;
    writer.abort();
}
