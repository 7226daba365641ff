//! In-memory message log of a room and the rules for mutating it.

use crate::error::ChatError;
use crate::protocol::{validate_text, ChatMessage, MessageKind, Profile};

/// Result of committing a `message` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Commit {
    /// Appended to the log with a fresh commit timestamp.
    New(ChatMessage),
    /// The id is already in the log; nothing changed.
    Duplicate(ChatMessage),
}

#[derive(Debug, Default)]
pub(crate) struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub(crate) fn from_messages(mut messages: Vec<ChatMessage>) -> Self {
        // logs written by this server are already ordered; older rows may not be
        messages.sort_by_key(|m| m.at);
        Self { messages }
    }

    pub(crate) fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn find(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    pub(crate) fn commit(
        &mut self,
        id: String,
        from: Profile,
        text: String,
        now: i64,
    ) -> Result<Commit, ChatError> {
        validate_text(&text)?;
        if let Some(index) = self.find(&id) {
            return Ok(Commit::Duplicate(self.messages[index].clone()));
        }

        let at = self.messages.last().map_or(now, |last| now.max(last.at));
        let message = ChatMessage {
            id,
            from,
            text,
            at,
            edited: false,
            edited_at: None,
            kind: MessageKind::Text,
        };
        self.messages.push(message.clone());
        Ok(Commit::New(message))
    }

    /// Replaces the text of a message authored by `editor`. Returns the edited record.
    pub(crate) fn edit(
        &mut self,
        editor: &str,
        message_id: &str,
        text: String,
        now: i64,
    ) -> Result<&ChatMessage, ChatError> {
        validate_text(&text)?;
        let index = self.authored(editor, message_id)?;

        let message = &mut self.messages[index];
        message.text = text;
        message.edited = true;
        message.edited_at = Some(now);
        Ok(message)
    }

    pub(crate) fn delete(&mut self, requester: &str, message_id: &str) -> Result<ChatMessage, ChatError> {
        let index = self.authored(requester, message_id)?;
        Ok(self.messages.remove(index))
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }

    fn authored(&self, user_id: &str, message_id: &str) -> Result<usize, ChatError> {
        let index = self
            .find(message_id)
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
        if self.messages[index].from.id != user_id {
            return Err(ChatError::Unauthorized {
                user_id: user_id.to_string(),
                message_id: message_id.to_string(),
            });
        }
        Ok(index)
    }
}
