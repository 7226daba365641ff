//! Remembers the last open room per local user, outside the in-memory store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::clock::now_millis;
use crate::directory::RoomId;
use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub user_id: String,
    pub room_id: RoomId,
    pub saved_at: i64,
}

impl Selection {
    fn is_valid_for(&self, user_id: &str) -> bool {
        self.user_id == user_id && self.room_id.as_str().starts_with("room-") && self.saved_at > 0
    }
}

#[derive(Debug, Clone)]
pub struct SelectionStore {
    dir: PathBuf,
}

impl SelectionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        let name: String = user_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.selection.json"))
    }

    pub async fn save(&self, user_id: &str, room_id: &RoomId) -> Result<(), ChatError> {
        fs::create_dir_all(&self.dir).await?;
        let selection = Selection {
            user_id: user_id.to_string(),
            room_id: room_id.clone(),
            saved_at: now_millis(),
        };
        fs::write(self.path_for(user_id), serde_json::to_vec(&selection)?).await?;
        Ok(())
    }

    /// Last saved room for `user_id`. Anything unreadable or malformed is discarded silently.
    pub async fn restore(&self, user_id: &str) -> Option<RoomId> {
        let path = self.path_for(user_id);
        let raw = fs::read(&path).await.ok()?;

        match serde_json::from_slice::<Selection>(&raw) {
            Ok(selection) if selection.is_valid_for(user_id) => Some(selection.room_id),
            _ => {
                debug!(path = %path.display(), "discarding malformed room selection");
                discard(&path).await;
                None
            }
        }
    }

    pub async fn clear(&self, user_id: &str) {
        discard(&self.path_for(user_id)).await;
    }
}

async fn discard(path: &Path) {
    let _ = fs::remove_file(path).await;
}
