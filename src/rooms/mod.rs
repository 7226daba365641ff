//! Room session server: one actor per active room, addressed by room id.

mod log;
mod msg;
mod presence;
mod room;
mod ws;

pub use log::LogStore;
pub use room::{RoomEvent, INACTIVITY_DELETER};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::now_millis;
use crate::config::SessionConfig;
use crate::db::Database;
use crate::directory::{Directory, RoomId};
use crate::error::ChatError;
use crate::protocol::ChatMessage;
use crate::AppState;
use room::RoomSession;

pub fn router() -> Router<AppState> {
    Router::new().route("/{room_id}/ws", get(ws::room_ws))
}

pub(crate) struct RegistryInner {
    pub(crate) rooms: DashMap<RoomId, mpsc::Sender<RoomEvent>>,
    store: LogStore,
    directory: Directory,
    config: SessionConfig,
}

/// The only way to reach a room session. Sessions are started on demand.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(db: Database, directory: Directory, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: DashMap::new(),
                store: LogStore::new(db),
                directory,
                config,
            }),
        }
    }

    /// Handle to the room's session, starting one if none is running.
    pub fn handle(&self, room_id: &RoomId) -> RoomHandle {
        let mut entry = self
            .inner
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| self.spawn(room_id));
        if entry.is_closed() {
            *entry = self.spawn(room_id);
        }

        RoomHandle {
            room_id: room_id.clone(),
            tx: entry.clone(),
        }
    }

    fn spawn(&self, room_id: &RoomId) -> mpsc::Sender<RoomEvent> {
        self.spawn_idle(room_id, Duration::ZERO)
    }

    fn spawn_idle(&self, room_id: &RoomId, idle_for: Duration) -> mpsc::Sender<RoomEvent> {
        RoomSession::spawn(
            room_id.clone(),
            self.inner.store.clone(),
            self.inner.directory.clone(),
            &self.inner.config,
            idle_for,
            Arc::downgrade(&self.inner),
        )
    }

    /// Starts a session for every room known to storage, each expiring relative
    /// to its last recorded activity. Rooms idle past the limit are purged right away.
    ///
    /// Returns the number of sessions started.
    pub async fn resume(&self) -> Result<usize, ChatError> {
        let mut last_seen: BTreeMap<RoomId, i64> = BTreeMap::new();
        let stored = self
            .inner
            .directory
            .last_activity()
            .await?
            .into_iter()
            .chain(self.inner.store.last_updates().await?);
        for (room_id, at) in stored {
            let seen = last_seen.entry(room_id).or_insert(at);
            *seen = (*seen).max(at);
        }

        let now = now_millis();
        let mut started = 0;
        for (room_id, at) in last_seen {
            let idle_for = Duration::from_millis(u64::try_from(now - at).unwrap_or(0));
            if let Entry::Vacant(slot) = self.inner.rooms.entry(room_id.clone()) {
                slot.insert(self.spawn_idle(&room_id, idle_for));
                started += 1;
            }
        }

        info!(started, "room sessions resumed");
        Ok(started)
    }

    pub fn is_active(&self, room_id: &RoomId) -> bool {
        self.inner
            .rooms
            .get(room_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn log_store(&self) -> &LogStore {
        &self.inner.store
    }

    /// Starts sessions for room ids announced by the directory.
    pub fn spawn_provisioner(&self, mut rx: mpsc::UnboundedReceiver<RoomId>) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(room_id) = rx.recv().await {
                registry.handle(&room_id);
                debug!(room_id = %room_id, "room session provisioned");
            }
        })
    }
}

#[derive(Clone, Debug)]
pub struct RoomHandle {
    room_id: RoomId,
    tx: mpsc::Sender<RoomEvent>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub async fn send(&self, event: RoomEvent) -> Result<(), ChatError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ChatError::RoomUnavailable(self.room_id.to_string()))
    }

    /// Current log of the room, loading it if the session has not yet.
    pub async fn snapshot(&self) -> Result<Vec<ChatMessage>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomEvent::Snapshot { reply }).await?;
        rx.await
            .map_err(|_| ChatError::RoomUnavailable(self.room_id.to_string()))?
    }
}
