//! Who is connected to a room and who is typing. Held in memory only.

use std::collections::{BTreeSet, HashMap};

use crate::protocol::{PresenceRecord, Profile};

#[derive(Debug)]
struct Entry {
    record: PresenceRecord,
    connections: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Presence {
    users: HashMap<String, Entry>,
    typing: BTreeSet<String>,
}

impl Presence {
    /// Registers one more connection for `user`.
    pub(crate) fn join(&mut self, user: &Profile, now: i64) {
        let entry = self.users.entry(user.id.clone()).or_insert_with(|| Entry {
            record: PresenceRecord {
                id: user.id.clone(),
                name: user.name.clone(),
                avatar: user.avatar.clone(),
                is_online: true,
                last_seen: now,
            },
            connections: 0,
        });
        entry.connections += 1;
        entry.record.name = user.name.clone();
        entry.record.avatar = user.avatar.clone();
        entry.record.last_seen = now;
    }

    /// Drops one connection of `user_id`. Returns true when that was the user's last one.
    pub(crate) fn leave(&mut self, user_id: &str) -> bool {
        let Some(entry) = self.users.get_mut(user_id) else {
            return false;
        };
        entry.connections = entry.connections.saturating_sub(1);
        if entry.connections > 0 {
            return false;
        }
        self.users.remove(user_id);
        self.typing.remove(user_id);
        true
    }

    pub(crate) fn touch(&mut self, user_id: &str, now: i64) {
        if let Some(entry) = self.users.get_mut(user_id) {
            entry.record.last_seen = now;
        }
    }

    pub(crate) fn set_typing(&mut self, user_id: &str, is_typing: bool) -> bool {
        if is_typing {
            self.typing.insert(user_id.to_string())
        } else {
            self.typing.remove(user_id)
        }
    }

    pub(crate) fn is_typing(&self, user_id: &str) -> bool {
        self.typing.contains(user_id)
    }

    pub(crate) fn clear_typing(&mut self) {
        self.typing.clear();
    }

    /// Online users ordered by name, then id.
    pub(crate) fn online(&self) -> Vec<PresenceRecord> {
        let mut users: Vec<PresenceRecord> =
            self.users.values().map(|e| e.record.clone()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        users
    }
}
