//! Error types for the directory, the room sessions and the client store.

use thiserror::Error;

use crate::protocol::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyText,

    #[error("message text is {len} characters, the limit is {max}")]
    TextTooLong { len: usize, max: usize },
}

/// Failures of room session and client operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("user {user_id} may not modify message {message_id}")]
    Unauthorized { user_id: String, message_id: String },

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("room session unavailable: {0}")]
    RoomUnavailable(String),

    #[error("not connected to a room")]
    NotConnected,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ChatError {
    /// Protocol code for errors that are reported back to a connection.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Validation(_) => Some(ErrorCode::Validation),
            Self::Unauthorized { .. } => Some(ErrorCode::Unauthorized),
            Self::MessageNotFound(_) => Some(ErrorCode::NotFound),
            Self::RoomUnavailable(_) | Self::Storage(_) => Some(ErrorCode::Unavailable),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("a room needs at least two distinct participants, got {0}")]
    InvalidParticipants(usize),

    #[error("room not found: {0}")]
    NotFound(String),

    #[error("room {0} already belongs to a different participant set")]
    ParticipantConflict(String),

    #[error("missing request body for {0}")]
    MissingBody(&'static str),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl DirectoryError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParticipants(_) | Self::MissingBody(_) | Self::Codec(_)
        )
    }
}
