//! Client-side room state: the message list plus everything needed to show a room.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::RoomId;
use crate::error::ValidationError;
use crate::protocol::{
    validate_text, ChatMessage, ClientFrame, MessageKind, PresenceRecord, Profile, ServerEvent,
    ServerFrame,
};

use super::reconcile::merge_snapshot;

/// Delivery state of one message as seen by this client.
///
/// `Sending` and `Sent` are pending; `Delivered` (own message echoed back) and
/// `Received` (someone else's) are confirmed; `Failed` means the server
/// rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Sending,
    Sent,
    Delivered,
    Received,
    Failed,
}

impl Delivery {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Sending | Self::Sent)
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, Self::Delivered | Self::Received)
    }

    /// Status of a committed message this client had no local entry for.
    pub(crate) fn for_commit(message: &ChatMessage, local_user: Option<&str>) -> Self {
        if local_user == Some(message.from.id.as_str()) {
            Self::Delivered
        } else {
            Self::Received
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub status: Delivery,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Inline system line shown in the conversation, never sent anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub at: i64,
    pub message_id: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ClientStore {
    messages: Vec<Envelope>,
    room: Option<RoomId>,
    local_user: Option<Profile>,
    presence: Vec<PresenceRecord>,
    typing: BTreeSet<String>,
    status: ConnectionStatus,
    last_synced: i64,
    notices: Vec<Notice>,
    room_deleted: bool,
}

impl ClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points the store at `room_id`. Switching rooms drops the old room's
    /// state; re-entering the same room keeps it for reconciliation.
    pub fn enter_room(&mut self, room_id: RoomId, user: Profile) {
        if self.room.as_ref() != Some(&room_id) {
            *self = Self::default();
            self.room = Some(room_id);
        }
        self.local_user = Some(user);
        self.room_deleted = false;
        self.status = ConnectionStatus::Connecting;
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        if status == ConnectionStatus::Disconnected {
            // nobody's typing state is known without a connection
            self.typing.clear();
        }
    }

    /// Validates `text` and appends an optimistic entry under a fresh id.
    ///
    /// A rejected text leaves a notice and adds nothing to the message list.
    pub fn stage_message(&mut self, text: &str, now: i64) -> Result<String, ValidationError> {
        if let Err(err) = validate_text(text) {
            self.notice(err.to_string(), now, None);
            return Err(err);
        }

        let from = self
            .local_user
            .clone()
            .unwrap_or_else(|| Profile::new("", ""));
        let id = Uuid::now_v7().to_string();
        self.messages.push(Envelope {
            message: ChatMessage {
                id: id.clone(),
                from,
                text: text.to_string(),
                at: now,
                edited: false,
                edited_at: None,
                kind: MessageKind::Text,
            },
            status: Delivery::Sending,
        });

        Ok(id)
    }

    pub fn mark_sent(&mut self, id: &str) {
        if let Some(entry) = self.entry_mut(id)
            && entry.status == Delivery::Sending
        {
            entry.status = Delivery::Sent;
        }
    }

    pub fn mark_failed(&mut self, id: &str) {
        if let Some(entry) = self.entry_mut(id)
            && entry.status.is_pending()
        {
            entry.status = Delivery::Failed;
        }
    }

    /// Frames that should be re-sent after a reconnect.
    pub fn pending_frames(&self) -> Vec<ClientFrame> {
        self.messages
            .iter()
            .filter(|e| e.status.is_pending())
            .map(|e| ClientFrame::Message {
                id: e.message.id.clone(),
                text: e.message.text.clone(),
            })
            .collect()
    }

    pub fn notice(&mut self, text: String, at: i64, message_id: Option<String>) {
        self.notices.push(Notice {
            text,
            at,
            message_id,
        });
    }

    pub fn apply(&mut self, frame: ServerFrame, now: i64) {
        match frame {
            ServerFrame::Message(message) => self.apply_commit(message),
            ServerFrame::Event(event) => self.apply_event(event, now),
        }
    }

    fn apply_commit(&mut self, message: ChatMessage) {
        let local_user = self.local_user.as_ref().map(|u| u.id.as_str());
        let status = match self.entry(&message.id) {
            Some(existing) if existing.status == Delivery::Received => Delivery::Received,
            Some(_) => Delivery::Delivered,
            None => Delivery::for_commit(&message, local_user),
        };

        match self.entry_mut(&message.id) {
            Some(entry) => {
                entry.message = message;
                entry.status = status;
            }
            None => self.messages.push(Envelope { message, status }),
        }
        self.messages.sort_by_key(|e| e.message.at);
    }

    fn apply_event(&mut self, event: ServerEvent, now: i64) {
        match event {
            ServerEvent::Sync { messages } => {
                let local_user = self.local_user.as_ref().map(|u| u.id.as_str());
                let merged = merge_snapshot(&self.messages, &messages, self.last_synced, local_user);
                self.messages = merged.messages;
                self.last_synced = merged.mark;
            }
            ServerEvent::MessageDeleted { message_id } => {
                self.messages.retain(|e| e.message.id != message_id);
            }
            ServerEvent::MessageEdited {
                message_id,
                text,
                edited_at,
            } => {
                if let Some(entry) = self.entry_mut(&message_id) {
                    entry.message.text = text;
                    entry.message.edited = true;
                    entry.message.edited_at = Some(edited_at);
                }
            }
            ServerEvent::RoomDeleted { .. } => {
                self.messages.clear();
                self.typing.clear();
                self.presence.clear();
                self.room_deleted = true;
            }
            ServerEvent::RoomUsers { users } => self.presence = users,
            ServerEvent::Typing { from, is_typing } => {
                if is_typing {
                    self.typing.insert(from);
                } else {
                    self.typing.remove(&from);
                }
            }
            ServerEvent::Error {
                message,
                message_id,
                ..
            } => {
                if let Some(id) = &message_id {
                    self.mark_failed(id);
                }
                self.notice(message, now, message_id);
            }
        }
    }

    fn entry(&self, id: &str) -> Option<&Envelope> {
        self.messages.iter().find(|e| e.message.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut Envelope> {
        self.messages.iter_mut().find(|e| e.message.id == id)
    }

    pub fn messages(&self) -> &[Envelope] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Envelope> {
        self.entry(id)
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub fn local_user(&self) -> Option<&Profile> {
        self.local_user.as_ref()
    }

    pub fn presence(&self) -> &[PresenceRecord] {
        &self.presence
    }

    pub fn typing(&self) -> &BTreeSet<String> {
        &self.typing
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_synced(&self) -> i64 {
        self.last_synced
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn is_room_deleted(&self) -> bool {
        self.room_deleted
    }
}
