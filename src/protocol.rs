//! Wire types shared by the room websocket endpoint and the client store.
//!
//! Client frames are a closed, internally tagged union. Server frames are the
//! same except for committed messages, which travel bare with `type: "text"`;
//! [`ServerFrame::decode`] dispatches on that tag explicitly so any other
//! unrecognized `type` is a decode error rather than a guess.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Maximum message length, in characters.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Identity and display data of a chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
}

/// A committed chat message as held in a room log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub from: Profile,
    pub text: String,
    /// Commit timestamp, unix millis. Assigned by the room session.
    pub at: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Message { id: String, text: String },
    Typing { is_typing: bool },
    DeleteMessage { message_id: String },
    EditMessage { message_id: String, text: String },
    DeleteRoom,
}

impl ClientFrame {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
            Self::DeleteMessage { .. } => "delete_message",
            Self::EditMessage { .. } => "edit_message",
            Self::DeleteRoom => "delete_room",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Unauthorized,
    NotFound,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Sync {
        messages: Vec<ChatMessage>,
    },
    MessageDeleted {
        message_id: String,
    },
    MessageEdited {
        message_id: String,
        text: String,
        edited_at: i64,
    },
    RoomDeleted {
        room_id: String,
        deleted_by: String,
    },
    RoomUsers {
        users: Vec<PresenceRecord>,
    },
    Typing {
        from: String,
        is_typing: bool,
    },
    /// Sent only to the connection whose frame was rejected.
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Event(ServerEvent),
    /// A committed message, echoed to every connection including its sender.
    Message(ChatMessage),
}

impl ServerFrame {
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        match value.get("type").and_then(Value::as_str) {
            Some("text") => serde_json::from_value(value).map(Self::Message),
            _ => serde_json::from_value(value).map(Self::Event),
        }
    }
}

impl From<ServerEvent> for ServerFrame {
    fn from(event: ServerEvent) -> Self {
        Self::Event(event)
    }
}

/// Checks message text against the 1..=2000 character bound.
pub fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let len = text.chars().count();
    if len > MAX_MESSAGE_LEN {
        return Err(ValidationError::TextTooLong {
            len,
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_wire_names() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"edit_message","messageId":"m1","text":"x"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::EditMessage {
                message_id: "m1".into(),
                text: "x".into()
            }
        );

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"delete_room"}"#).unwrap();
        assert_eq!(frame, ClientFrame::DeleteRoom);

        let json = serde_json::to_value(ClientFrame::Typing { is_typing: true }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "typing", "isTyping": true}));
    }

    #[test]
    fn unknown_client_frame_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"shout","text":"hi"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"id":"m1","text":"hi"}"#).is_err());
    }

    #[test]
    fn committed_message_travels_bare() {
        let msg = ChatMessage {
            id: "m1".into(),
            from: Profile::new("u1", "Ann"),
            text: "hi".into(),
            at: 42,
            edited: false,
            edited_at: None,
            kind: MessageKind::Text,
        };
        let json = serde_json::to_value(ServerFrame::Message(msg.clone())).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "m1",
                "from": {"id": "u1", "name": "Ann"},
                "text": "hi",
                "at": 42,
                "type": "text"
            })
        );
        assert_eq!(
            ServerFrame::decode(&json.to_string()).unwrap(),
            ServerFrame::Message(msg)
        );
    }

    #[test]
    fn server_decode_dispatches_on_type() {
        let frame = ServerFrame::decode(r#"{"type":"typing","from":"u2","isTyping":false}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Event(ServerEvent::Typing {
                from: "u2".into(),
                is_typing: false
            })
        );
        assert!(ServerFrame::decode(r#"{"type":"mystery"}"#).is_err());
        assert!(ServerFrame::decode(r#"{"id":"m1","text":"raw"}"#).is_err());
    }

    #[test]
    fn text_bounds() {
        assert_eq!(validate_text(""), Err(ValidationError::EmptyText));
        assert_eq!(validate_text("   "), Err(ValidationError::EmptyText));
        assert!(validate_text(&"a".repeat(MAX_MESSAGE_LEN)).is_ok());
        assert_eq!(
            validate_text(&"a".repeat(MAX_MESSAGE_LEN + 1)),
            Err(ValidationError::TextTooLong {
                len: MAX_MESSAGE_LEN + 1,
                max: MAX_MESSAGE_LEN
            })
        );
        // multi-byte characters count once
        assert!(validate_text(&"é".repeat(MAX_MESSAGE_LEN)).is_ok());
    }
}
