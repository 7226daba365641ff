//! Websocket transport to a room session.

use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::directory::RoomId;
use crate::error::ChatError;
use crate::protocol::Profile;

pub type RoomSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `ws(s)://host/r/{room_id}/ws?user=<profile json>` for an `http(s)` server base url.
pub fn room_url(base: &Url, room_id: &RoomId, user: &Profile) -> Result<Url, ChatError> {
    let identity = serde_json::to_string(user)?;
    let mut url = base
        .join(&format!("r/{room_id}/ws"))
        .map_err(|e| ChatError::Url(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ChatError::Url(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ChatError::Url(format!("cannot use scheme {scheme}")))?;
    url.query_pairs_mut().clear().append_pair("user", &identity);

    Ok(url)
}

pub async fn open(base: &Url, room_id: &RoomId, user: &Profile) -> Result<RoomSocket, ChatError> {
    let url = room_url(base, room_id, user)?;
    debug!(room_id = %room_id, url = %url, "opening room socket");
    let (socket, _) = connect_async(url.as_str()).await?;
    Ok(socket)
}
