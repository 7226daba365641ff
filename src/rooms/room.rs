//! Room session actor.
//!
//! Each active room runs as one task that owns its message log, presence and
//! typing set. Every mutation arrives as a [`RoomEvent`] on the room's mailbox
//! and is processed to completion before the next one, so commit order,
//! broadcast order and persisted order are the same.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::now_millis;
use crate::config::SessionConfig;
use crate::directory::{ConnectionAction, Directory, LastMessage, RoomId};
use crate::error::ChatError;
use crate::protocol::{ChatMessage, ClientFrame, ErrorCode, Profile, ServerEvent, ServerFrame};

use super::log::LogStore;
use super::msg::{Commit, MessageLog};
use super::presence::Presence;
use super::RegistryInner;

/// Reason recorded in `room_deleted` when the inactivity timer fires.
pub const INACTIVITY_DELETER: &str = "inactivity";

#[derive(Debug)]
pub enum RoomEvent {
    Connect {
        conn_id: Uuid,
        user: Profile,
        outbound: mpsc::UnboundedSender<ServerFrame>,
    },
    Frame {
        conn_id: Uuid,
        user: Profile,
        frame: ClientFrame,
    },
    Disconnect {
        conn_id: Uuid,
    },
    Snapshot {
        reply: oneshot::Sender<Result<Vec<ChatMessage>, ChatError>>,
    },
}

struct Connection {
    user: Profile,
    outbound: mpsc::UnboundedSender<ServerFrame>,
}

pub(crate) struct RoomSession {
    room_id: RoomId,
    /// Loaded from storage on first use, then kept for the session's lifetime.
    log: Option<MessageLog>,
    connections: HashMap<Uuid, Connection>,
    presence: Presence,
    store: LogStore,
    directory: Directory,
    inactivity: Duration,
    idle_deadline: Instant,
    registry: Weak<RegistryInner>,
}

impl RoomSession {
    /// Starts the actor. `idle_for` is how long the room has already been
    /// inactive, so a resumed room keeps its original expiry.
    pub(crate) fn spawn(
        room_id: RoomId,
        store: LogStore,
        directory: Directory,
        config: &SessionConfig,
        idle_for: Duration,
        registry: Weak<RegistryInner>,
    ) -> mpsc::Sender<RoomEvent> {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity);

        let session = Self {
            room_id,
            log: None,
            connections: HashMap::new(),
            presence: Presence::default(),
            store,
            directory,
            inactivity: config.inactivity,
            idle_deadline: Instant::now() + config.inactivity.saturating_sub(idle_for),
            registry,
        };
        tokio::spawn(session.run(rx));

        tx
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RoomEvent>) {
        info!(room_id = %self.room_id, "room session started");

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if !matches!(event, RoomEvent::Snapshot { .. }) {
                        self.idle_deadline = Instant::now() + self.inactivity;
                    }
                    self.handle_event(event).await;
                }
                () = tokio::time::sleep_until(self.idle_deadline) => {
                    self.expire().await;
                    rx.close();
                    self.deregister();
                    // connects that raced the expiry are dropped and their sockets close
                    while rx.try_recv().is_ok() {}
                    break;
                }
            }
        }

        info!(room_id = %self.room_id, "room session stopped");
    }

    async fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Connect {
                conn_id,
                user,
                outbound,
            } => self.on_connect(conn_id, user, outbound).await,
            RoomEvent::Frame {
                conn_id,
                user,
                frame,
            } => self.on_frame(conn_id, user, frame).await,
            RoomEvent::Disconnect { conn_id } => self.on_disconnect(conn_id).await,
            RoomEvent::Snapshot { reply } => {
                let snapshot = self.ensure_log().await.map(|log| log.messages().to_vec());
                let _ = reply.send(snapshot);
            }
        }
    }

    async fn ensure_log(&mut self) -> Result<&mut MessageLog, ChatError> {
        let log = match self.log.take() {
            Some(log) => log,
            None => {
                let messages = self.store.load(&self.room_id).await?;
                debug!(room_id = %self.room_id, count = messages.len(), "room log loaded");
                MessageLog::from_messages(messages)
            }
        };
        Ok(self.log.insert(log))
    }

    async fn on_connect(
        &mut self,
        conn_id: Uuid,
        user: Profile,
        outbound: mpsc::UnboundedSender<ServerFrame>,
    ) {
        let messages = match self.ensure_log().await {
            Ok(log) => log.messages().to_vec(),
            Err(err) => {
                error!(room_id = %self.room_id, error = %err, "failed to load room log");
                let _ = outbound.send(
                    ServerEvent::Error {
                        code: ErrorCode::Unavailable,
                        message: "room history is unavailable".to_string(),
                        message_id: None,
                    }
                    .into(),
                );
                return;
            }
        };

        self.presence.join(&user, now_millis());
        let users = self.presence.online();
        let _ = outbound.send(ServerEvent::Sync { messages }.into());
        let _ = outbound.send(ServerEvent::RoomUsers { users: users.clone() }.into());

        info!(room_id = %self.room_id, user_id = %user.id, %conn_id, "user connected");
        self.connections.insert(conn_id, Connection { user, outbound });
        self.broadcast_except(conn_id, ServerEvent::RoomUsers { users }.into());

        if let Err(err) = self
            .directory
            .update_connection_count(&self.room_id, 1, ConnectionAction::Enter)
            .await
        {
            debug!(room_id = %self.room_id, error = %err, "connection count not recorded");
        }
    }

    async fn on_frame(&mut self, conn_id: Uuid, user: Profile, frame: ClientFrame) {
        let kind = frame.name();
        let message_id = match &frame {
            ClientFrame::Message { id, .. } => Some(id.clone()),
            ClientFrame::EditMessage { message_id, .. }
            | ClientFrame::DeleteMessage { message_id } => Some(message_id.clone()),
            ClientFrame::Typing { .. } | ClientFrame::DeleteRoom => None,
        };
        self.presence.touch(&user.id, now_millis());

        if let Err(err) = self.apply(conn_id, &user, frame).await {
            warn!(
                room_id = %self.room_id,
                user_id = %user.id,
                frame = kind,
                error = %err,
                "frame rejected"
            );
            self.send_to(
                conn_id,
                ServerEvent::Error {
                    code: err.code().unwrap_or(ErrorCode::Unavailable),
                    message: err.to_string(),
                    message_id,
                }
                .into(),
            );
        }
    }

    async fn apply(&mut self, conn_id: Uuid, user: &Profile, frame: ClientFrame) -> Result<(), ChatError> {
        match frame {
            ClientFrame::Message { id, text } => {
                let commit = self
                    .ensure_log()
                    .await?
                    .commit(id, user.clone(), text, now_millis())?;
                match commit {
                    Commit::New(message) => {
                        self.persist().await;
                        self.broadcast(ServerFrame::Message(message.clone()));
                        self.publish_preview(&message).await;
                    }
                    Commit::Duplicate(message) => {
                        debug!(room_id = %self.room_id, message_id = %message.id, "duplicate message id, echoing to sender only");
                        self.send_to(conn_id, ServerFrame::Message(message));
                    }
                }
            }
            ClientFrame::EditMessage { message_id, text } => {
                let now = now_millis();
                let text = self
                    .ensure_log()
                    .await?
                    .edit(&user.id, &message_id, text, now)?
                    .text
                    .clone();
                self.persist().await;
                self.broadcast(
                    ServerEvent::MessageEdited {
                        message_id,
                        text,
                        edited_at: now,
                    }
                    .into(),
                );
            }
            ClientFrame::DeleteMessage { message_id } => {
                self.ensure_log().await?.delete(&user.id, &message_id)?;
                self.persist().await;
                self.broadcast(ServerEvent::MessageDeleted { message_id }.into());
            }
            ClientFrame::Typing { is_typing } => {
                self.presence.set_typing(&user.id, is_typing);
                self.broadcast_except(
                    conn_id,
                    ServerEvent::Typing {
                        from: user.id.clone(),
                        is_typing,
                    }
                    .into(),
                );
            }
            ClientFrame::DeleteRoom => {
                self.ensure_log().await?.clear();
                self.presence.clear_typing();
                self.persist().await;
                self.broadcast(
                    ServerEvent::RoomDeleted {
                        room_id: self.room_id.to_string(),
                        deleted_by: user.id.clone(),
                    }
                    .into(),
                );
                info!(room_id = %self.room_id, user_id = %user.id, "room deleted by participant");

                if let Err(err) = self.directory.delete_room(&self.room_id).await {
                    warn!(room_id = %self.room_id, error = %err, "directory deregistration failed");
                }
            }
        }
        Ok(())
    }

    async fn on_disconnect(&mut self, conn_id: Uuid) {
        let Some(conn) = self.connections.remove(&conn_id) else {
            return;
        };
        let user_id = conn.user.id;

        let was_typing = self.presence.is_typing(&user_id);
        if self.presence.leave(&user_id) && was_typing {
            self.broadcast(
                ServerEvent::Typing {
                    from: user_id.clone(),
                    is_typing: false,
                }
                .into(),
            );
        }
        self.broadcast(
            ServerEvent::RoomUsers {
                users: self.presence.online(),
            }
            .into(),
        );
        info!(room_id = %self.room_id, user_id = %user_id, %conn_id, "user disconnected");

        if let Err(err) = self
            .directory
            .update_connection_count(&self.room_id, -1, ConnectionAction::Leave)
            .await
        {
            debug!(room_id = %self.room_id, error = %err, "connection count not recorded");
        }
    }

    /// Writes the whole log. A failed write is logged; memory stays authoritative.
    async fn persist(&self) {
        let Some(log) = &self.log else {
            return;
        };
        if let Err(err) = self.store.save(&self.room_id, log.messages()).await {
            error!(room_id = %self.room_id, error = %err, "failed to persist room log");
        }
    }

    async fn publish_preview(&self, message: &ChatMessage) {
        let preview = LastMessage {
            text: message.text.clone(),
            from: message.from.id.clone(),
            at: message.at,
        };
        if let Err(err) = self
            .directory
            .update_last_message_preview(&self.room_id, &preview)
            .await
        {
            debug!(room_id = %self.room_id, error = %err, "last message preview not updated");
        }
    }

    async fn expire(&mut self) {
        info!(
            room_id = %self.room_id,
            idle_secs = self.inactivity.as_secs(),
            "room inactive, purging"
        );
        self.broadcast(
            ServerEvent::RoomDeleted {
                room_id: self.room_id.to_string(),
                deleted_by: INACTIVITY_DELETER.to_string(),
            }
            .into(),
        );
        self.connections.clear();
        self.log = None;

        if let Err(err) = self.store.purge(&self.room_id).await {
            error!(room_id = %self.room_id, error = %err, "failed to purge room log");
        }
        if let Err(err) = self.directory.delete_room(&self.room_id).await {
            warn!(room_id = %self.room_id, error = %err, "directory deregistration failed");
        }
    }

    fn deregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.rooms.remove_if(&self.room_id, |_, tx| tx.is_closed());
        }
    }

    fn send_to(&self, conn_id: Uuid, frame: ServerFrame) {
        if let Some(conn) = self.connections.get(&conn_id) {
            let _ = conn.outbound.send(frame);
        }
    }

    fn broadcast(&self, frame: ServerFrame) {
        for conn in self.connections.values() {
            let _ = conn.outbound.send(frame.clone());
        }
    }

    fn broadcast_except(&self, except: Uuid, frame: ServerFrame) {
        for (id, conn) in &self.connections {
            if *id != except {
                let _ = conn.outbound.send(frame.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::protocol::{MessageKind, MAX_MESSAGE_LEN};
    use crate::rooms::{RoomHandle, SessionRegistry};

    async fn registry(config: SessionConfig) -> (SessionRegistry, Directory) {
        let db = Database::connect(":memory:").await.unwrap();
        let directory = Directory::new(db.clone());
        (SessionRegistry::new(db, directory.clone(), config), directory)
    }

    async fn join(
        handle: &RoomHandle,
        user: &Profile,
    ) -> (Uuid, mpsc::UnboundedReceiver<ServerFrame>) {
        let (outbound, mut rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::now_v7();
        handle
            .send(RoomEvent::Connect {
                conn_id,
                user: user.clone(),
                outbound,
            })
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(ServerFrame::Event(ServerEvent::Sync { .. }))));
        assert!(matches!(
            rx.recv().await,
            Some(ServerFrame::Event(ServerEvent::RoomUsers { .. }))
        ));
        (conn_id, rx)
    }

    async fn send(handle: &RoomHandle, conn_id: Uuid, user: &Profile, frame: ClientFrame) {
        handle
            .send(RoomEvent::Frame {
                conn_id,
                user: user.clone(),
                frame,
            })
            .await
            .unwrap();
    }

    /// Everything delivered so far. The snapshot round trip orders after all earlier events.
    async fn drain(handle: &RoomHandle, rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> Vec<ServerFrame> {
        handle.snapshot().await.unwrap();
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn message_ids(frames: &[ServerFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| match f {
                ServerFrame::Message(m) => Some(m.id.clone()),
                _ => None,
            })
            .collect()
    }

    fn message(id: &str, text: &str) -> ClientFrame {
        ClientFrame::Message {
            id: id.into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn broadcast_order_matches_persisted_order() {
        let (registry, _) = registry(SessionConfig::default()).await;
        let room = RoomId::from("room-alice-bob");
        let handle = registry.handle(&room);
        let alice = Profile::new("alice", "Alice");
        let bob = Profile::new("bob", "Bob");

        let (a, mut alice_rx) = join(&handle, &alice).await;
        let (b, mut bob_rx) = join(&handle, &bob).await;

        send(&handle, a, &alice, message("m1", "one")).await;
        send(&handle, b, &bob, message("m2", "two")).await;
        send(&handle, a, &alice, message("m3", "three")).await;

        let persisted: Vec<String> = registry
            .log_store()
            .load(&room)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(persisted, ["m1", "m2", "m3"]);
        assert_eq!(message_ids(&drain(&handle, &mut bob_rx).await), persisted);
        assert_eq!(message_ids(&drain(&handle, &mut alice_rx).await), persisted);

        let log = handle.snapshot().await.unwrap();
        assert!(log.windows(2).all(|w| w[0].at <= w[1].at));

        // a retried id is echoed back to its sender and committed once
        send(&handle, a, &alice, message("m1", "one")).await;
        assert_eq!(message_ids(&drain(&handle, &mut alice_rx).await), ["m1"]);
        assert!(drain(&handle, &mut bob_rx).await.is_empty());
        assert_eq!(handle.snapshot().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn overlong_text_is_rejected_to_the_sender_only() {
        let (registry, _) = registry(SessionConfig::default()).await;
        let room = RoomId::from("room-alice-bob");
        let handle = registry.handle(&room);
        let alice = Profile::new("alice", "Alice");

        let (a, mut alice_rx) = join(&handle, &alice).await;
        let (_, mut bob_rx) = join(&handle, &Profile::new("bob", "Bob")).await;
        drain(&handle, &mut alice_rx).await;

        send(&handle, a, &alice, message("long", &"x".repeat(MAX_MESSAGE_LEN + 1))).await;

        let frames = drain(&handle, &mut alice_rx).await;
        assert!(matches!(
            frames.as_slice(),
            [ServerFrame::Event(ServerEvent::Error {
                code: ErrorCode::Validation,
                message_id: Some(id),
                ..
            })] if id == "long"
        ));
        assert!(drain(&handle, &mut bob_rx).await.is_empty());
        assert!(registry.log_store().load(&room).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_the_author_can_edit_or_delete() {
        let (registry, _) = registry(SessionConfig::default()).await;
        let room = RoomId::from("room-alice-bob");
        let handle = registry.handle(&room);
        let alice = Profile::new("alice", "Alice");
        let bob = Profile::new("bob", "Bob");

        let (a, mut alice_rx) = join(&handle, &alice).await;
        let (b, mut bob_rx) = join(&handle, &bob).await;
        send(&handle, a, &alice, message("m1", "original")).await;
        drain(&handle, &mut alice_rx).await;
        drain(&handle, &mut bob_rx).await;

        send(
            &handle,
            b,
            &bob,
            ClientFrame::EditMessage {
                message_id: "m1".into(),
                text: "hijacked".into(),
            },
        )
        .await;
        send(&handle, b, &bob, ClientFrame::DeleteMessage { message_id: "m1".into() }).await;

        let rejected = drain(&handle, &mut bob_rx).await;
        assert_eq!(rejected.len(), 2);
        assert!(rejected.iter().all(|f| matches!(
            f,
            ServerFrame::Event(ServerEvent::Error { code: ErrorCode::Unauthorized, .. })
        )));
        assert!(drain(&handle, &mut alice_rx).await.is_empty());

        let persisted = registry.log_store().load(&room).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].text, "original");
        assert!(!persisted[0].edited);

        send(
            &handle,
            a,
            &alice,
            ClientFrame::EditMessage {
                message_id: "m1".into(),
                text: "fixed".into(),
            },
        )
        .await;
        assert!(matches!(
            drain(&handle, &mut bob_rx).await.as_slice(),
            [ServerFrame::Event(ServerEvent::MessageEdited { text, .. })] if text == "fixed"
        ));
        assert!(registry.log_store().load(&room).await.unwrap()[0].edited);
    }

    #[tokio::test]
    async fn delete_room_clears_log_and_directory() {
        let (registry, directory) = registry(SessionConfig::default()).await;
        let outcome = directory.create_or_get_room(["alice", "bob"], None).await.unwrap();
        let room = outcome.room_id;
        let handle = registry.handle(&room);
        let alice = Profile::new("alice", "Alice");

        let (a, mut alice_rx) = join(&handle, &alice).await;
        let (_, mut bob_rx) = join(&handle, &Profile::new("bob", "Bob")).await;
        send(&handle, a, &alice, message("m1", "bye")).await;
        drain(&handle, &mut alice_rx).await;
        drain(&handle, &mut bob_rx).await;

        send(&handle, a, &alice, ClientFrame::DeleteRoom).await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            assert!(drain(&handle, rx).await.iter().any(|f| matches!(
                f,
                ServerFrame::Event(ServerEvent::RoomDeleted { deleted_by, .. }) if deleted_by == "alice"
            )));
        }
        assert!(registry.log_store().load(&room).await.unwrap().is_empty());
        assert!(directory.get_room(&room).await.is_err());
    }

    #[tokio::test]
    async fn presence_and_counts_follow_connections() {
        let (registry, directory) = registry(SessionConfig::default()).await;
        let room = directory
            .create_or_get_room(["alice", "bob"], None)
            .await
            .unwrap()
            .room_id;
        let handle = registry.handle(&room);
        let alice = Profile::new("alice", "Alice");

        let (a, _alice_rx) = join(&handle, &alice).await;
        let (_, mut bob_rx) = join(&handle, &Profile::new("bob", "Bob")).await;
        assert_eq!(directory.get_room(&room).await.unwrap().connections, 2);

        send(&handle, a, &alice, ClientFrame::Typing { is_typing: true }).await;
        handle.send(RoomEvent::Disconnect { conn_id: a }).await.unwrap();

        let frames = drain(&handle, &mut bob_rx).await;
        assert_eq!(
            frames[..2],
            [
                ServerFrame::Event(ServerEvent::Typing {
                    from: "alice".into(),
                    is_typing: true
                }),
                ServerFrame::Event(ServerEvent::Typing {
                    from: "alice".into(),
                    is_typing: false
                }),
            ]
        );
        assert!(matches!(
            &frames[2],
            ServerFrame::Event(ServerEvent::RoomUsers { users }) if users.len() == 1 && users[0].id == "bob"
        ));
        assert_eq!(directory.get_room(&room).await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn inactive_room_is_purged() {
        let config = SessionConfig {
            inactivity: Duration::from_millis(200),
            ..SessionConfig::default()
        };
        let (registry, directory) = registry(config).await;
        let room = directory
            .create_or_get_room(["alice", "bob"], None)
            .await
            .unwrap()
            .room_id;
        let handle = registry.handle(&room);
        let alice = Profile::new("alice", "Alice");

        let (a, mut rx) = join(&handle, &alice).await;
        send(&handle, a, &alice, message("m1", "anyone?")).await;

        let deleted = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(frame) = rx.recv().await {
                if let ServerFrame::Event(ServerEvent::RoomDeleted { deleted_by, .. }) = frame {
                    return deleted_by;
                }
            }
            String::new()
        })
        .await
        .unwrap();
        assert_eq!(deleted, INACTIVITY_DELETER);

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.is_active(&room) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(registry.log_store().load(&room).await.unwrap().is_empty());
        assert!(directory.get_room(&room).await.is_err());

        // a later connection starts a fresh, empty session
        let handle = registry.handle(&room);
        assert!(handle.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_writes_still_broadcast_and_keep_memory_authoritative() {
        let db = Database::connect(":memory:").await.unwrap();
        let registry = SessionRegistry::new(
            db.clone(),
            Directory::new(db.clone()),
            SessionConfig::default(),
        );
        let room = RoomId::from("room-alice-bob");
        let handle = registry.handle(&room);
        let alice = Profile::new("alice", "Alice");

        let (a, mut alice_rx) = join(&handle, &alice).await;
        let (_, mut bob_rx) = join(&handle, &Profile::new("bob", "Bob")).await;

        sqlx::query("DROP TABLE room_logs")
            .execute(db.pool())
            .await
            .unwrap();
        send(&handle, a, &alice, message("m1", "kept in memory")).await;

        assert_eq!(message_ids(&drain(&handle, &mut alice_rx).await), ["m1"]);
        assert_eq!(message_ids(&drain(&handle, &mut bob_rx).await), ["m1"]);

        let log = handle.snapshot().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, "kept in memory");
        assert!(registry.log_store().load(&room).await.is_err());
    }

    #[tokio::test]
    async fn resumed_rooms_expire_from_stored_activity() {
        const DAY_MS: i64 = 24 * 60 * 60 * 1000;

        let db = Database::connect(":memory:").await.unwrap();
        let directory = Directory::new(db.clone());
        let store = LogStore::new(db.clone());
        let stale = directory
            .create_or_get_room(["alice", "bob"], None)
            .await
            .unwrap()
            .room_id;
        let fresh = directory
            .create_or_get_room(["carol", "dave"], None)
            .await
            .unwrap()
            .room_id;
        let orphan = RoomId::from("room-erin-frank");

        let old = ChatMessage {
            id: "m1".into(),
            from: Profile::new("alice", "Alice"),
            text: "long ago".into(),
            at: now_millis() - 8 * DAY_MS,
            edited: false,
            edited_at: None,
            kind: MessageKind::Text,
        };
        store.save(&stale, std::slice::from_ref(&old)).await.unwrap();
        store.save(&orphan, std::slice::from_ref(&old)).await.unwrap();
        store.save(&fresh, &[]).await.unwrap();

        let long_ago = now_millis() - 8 * DAY_MS;
        sqlx::query("UPDATE rooms SET last_activity = ? WHERE id = ?")
            .bind(long_ago)
            .bind(stale.as_str())
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE room_logs SET updated_at = ? WHERE room_id IN (?, ?)")
            .bind(long_ago)
            .bind(stale.as_str())
            .bind(orphan.as_str())
            .execute(db.pool())
            .await
            .unwrap();

        // a new registry over existing storage, as after a restart
        let registry = SessionRegistry::new(db, directory.clone(), SessionConfig::default());
        assert_eq!(registry.resume().await.unwrap(), 3);

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.is_active(&stale) || registry.is_active(&orphan) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(store.load(&stale).await.unwrap().is_empty());
        assert!(store.load(&orphan).await.unwrap().is_empty());
        assert!(directory.get_room(&stale).await.is_err());

        assert!(registry.is_active(&fresh));
        assert!(directory.get_room(&fresh).await.is_ok());
        assert_eq!(registry.resume().await.unwrap(), 0);
    }
}
