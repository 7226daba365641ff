//! Room directory: maps participant sets to room records.
//!
//! The record store is owned here. Room sessions only reach it through
//! [`Directory`] methods.

mod api;
mod room;
mod store;

pub use api::router;
pub use room::{ConnectionAction, LastMessage, ParticipantData, ParticipantProfile, Room, RoomId};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::now_millis;
use crate::db::Database;
use crate::error::DirectoryError;
use store::RoomStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    pub room_id: RoomId,
    pub existed: bool,
    pub room: Room,
}

/// Maintenance sweeps exposed through the `DELETE` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    EmptyRooms,
    TestRooms,
}

#[derive(Clone, Debug)]
pub struct Directory {
    db: Database,
    provisioner: Option<mpsc::UnboundedSender<RoomId>>,
}

impl Directory {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            provisioner: None,
        }
    }

    /// Newly created room ids are pushed to `provisioner` so a session can be started early.
    pub fn with_provisioner(mut self, provisioner: mpsc::UnboundedSender<RoomId>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    fn rooms(&self) -> RoomStore<'_> {
        RoomStore::new(self.db.pool())
    }

    pub async fn create_or_get_room<I, S>(
        &self,
        participants: I,
        participant_data: Option<ParticipantData>,
    ) -> Result<CreateOutcome, DirectoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (room_id, participants) = RoomId::for_participants(participants)?;
        let now = now_millis();
        let candidate = Room {
            id: room_id.clone(),
            participants,
            participant_data: participant_data.clone(),
            last_activity: now,
            created_at: now,
            connections: 0,
            last_message: None,
        };

        let created = self.rooms().insert_if_absent(&candidate).await?;
        if created {
            info!(room_id = %room_id, "room created");
            self.request_provisioning(&room_id);
        } else {
            let existing = self.get_room(&room_id).await?;
            // ids containing '-' can derive the same room id from another set
            if existing.participants != candidate.participants {
                warn!(
                    room_id = %room_id,
                    stored = ?existing.participants,
                    requested = ?candidate.participants,
                    "room id collision between participant sets"
                );
                return Err(DirectoryError::ParticipantConflict(room_id.to_string()));
            }
            if let Some(data) = &participant_data
                && self.rooms().backfill_participant_data(&room_id, data).await?
            {
                debug!(room_id = %room_id, "participant data backfilled");
            }
        }

        let room = self.get_room(&room_id).await?;

        Ok(CreateOutcome {
            room_id,
            existed: !created,
            room,
        })
    }

    fn request_provisioning(&self, room_id: &RoomId) {
        match &self.provisioner {
            Some(tx) => {
                if tx.send(room_id.clone()).is_err() {
                    warn!(room_id = %room_id, "session provisioner gone, room will start on first connect");
                }
            }
            None => debug!(room_id = %room_id, "no session provisioner configured"),
        }
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<Room, DirectoryError> {
        self.rooms()
            .find(room_id)
            .await?
            .ok_or_else(|| DirectoryError::NotFound(room_id.to_string()))
    }

    /// Rooms `user_id` participates in, in no particular order.
    pub async fn list_rooms_for_user(&self, user_id: &str) -> Result<Vec<Room>, DirectoryError> {
        Ok(self.rooms().list_for_user(user_id).await?)
    }

    /// Last recorded activity of every room in the directory.
    pub async fn last_activity(&self) -> Result<Vec<(RoomId, i64)>, DirectoryError> {
        let rows = self.rooms().activity().await?;
        Ok(rows.into_iter().map(|(id, at)| (RoomId::from(id), at)).collect())
    }

    pub async fn update_connection_count(
        &self,
        room_id: &RoomId,
        delta: i64,
        action: ConnectionAction,
    ) -> Result<(), DirectoryError> {
        let found = match action {
            ConnectionAction::Enter => {
                self.rooms()
                    .adjust_connections(room_id, delta, Some(now_millis()))
                    .await?
            }
            ConnectionAction::Leave => self.rooms().adjust_connections(room_id, delta, None).await?,
            ConnectionAction::Delete => {
                self.rooms().delete(room_id).await?;
                return Ok(());
            }
        };

        if found {
            Ok(())
        } else {
            Err(DirectoryError::NotFound(room_id.to_string()))
        }
    }

    pub async fn update_last_message_preview(
        &self,
        room_id: &RoomId,
        preview: &LastMessage,
    ) -> Result<(), DirectoryError> {
        if self.rooms().set_last_message(room_id, preview).await? {
            Ok(())
        } else {
            Err(DirectoryError::NotFound(room_id.to_string()))
        }
    }

    /// Removes the record. Deleting an absent room is not an error.
    pub async fn delete_room(&self, room_id: &RoomId) -> Result<bool, DirectoryError> {
        let deleted = self.rooms().delete(room_id).await?;
        if deleted {
            info!(room_id = %room_id, "room deleted");
        }
        Ok(deleted)
    }

    pub async fn cleanup(&self, sweep: Sweep) -> Result<u64, DirectoryError> {
        let deleted = match sweep {
            Sweep::EmptyRooms => self.rooms().delete_empty().await?,
            Sweep::TestRooms => self.rooms().delete_test_rooms().await?,
        };
        info!(?sweep, deleted, "directory sweep finished");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn directory() -> Directory {
        Directory::new(Database::connect(":memory:").await.unwrap())
    }

    fn profile(name: &str) -> ParticipantProfile {
        ParticipantProfile {
            name: name.to_string(),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_and_order_independent() {
        let dir = directory().await;

        let first = dir.create_or_get_room(["u2", "u1"], None).await.unwrap();
        assert_eq!(first.room_id.as_str(), "room-u1-u2");
        assert!(!first.existed);

        let second = dir.create_or_get_room(["u1", "u2"], None).await.unwrap();
        assert_eq!(second.room_id, first.room_id);
        assert!(second.existed);
        assert_eq!(second.room.created_at, first.room.created_at);
    }

    #[tokio::test]
    async fn concurrent_creators_materialize_one_room() {
        let dir = directory().await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let dir = dir.clone();
            tasks.push(tokio::spawn(async move {
                let ids = if i % 2 == 0 { ["a", "b"] } else { ["b", "a"] };
                dir.create_or_get_room(ids, None).await.unwrap()
            }));
        }

        let mut created = 0;
        for task in tasks {
            let outcome = task.await.unwrap();
            assert_eq!(outcome.room_id.as_str(), "room-a-b");
            if !outcome.existed {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(dir.list_rooms_for_user("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn single_participant_is_rejected() {
        let dir = directory().await;
        let err = dir.create_or_get_room(["u1"], None).await.unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidParticipants(1)));
    }

    #[tokio::test]
    async fn colliding_participant_sets_never_share_a_room() {
        let dir = directory().await;
        let data = ParticipantData::from([("a".to_string(), profile("Intruder"))]);

        let first = dir.create_or_get_room(["a-b", "c"], None).await.unwrap();
        assert_eq!(first.room_id.as_str(), "room-a-b-c");

        let err = dir
            .create_or_get_room(["a", "b-c"], Some(data))
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::ParticipantConflict(id) if id == "room-a-b-c"));

        let room = dir.get_room(&first.room_id).await.unwrap();
        assert_eq!(room.participants, vec!["a-b", "c"]);
        assert!(room.participant_data.is_none());
        assert!(dir.list_rooms_for_user("a").await.unwrap().is_empty());

        // the original set still resolves to its room
        assert!(dir.create_or_get_room(["c", "a-b"], None).await.unwrap().existed);
    }

    #[tokio::test]
    async fn participant_data_is_backfilled_once() {
        let dir = directory().await;
        dir.create_or_get_room(["u1", "u2"], None).await.unwrap();

        let data = ParticipantData::from([("u1".to_string(), profile("Ann"))]);
        let outcome = dir.create_or_get_room(["u1", "u2"], Some(data.clone())).await.unwrap();
        assert_eq!(outcome.room.participant_data, Some(data.clone()));

        let other = ParticipantData::from([("u1".to_string(), profile("Someone else"))]);
        let outcome = dir.create_or_get_room(["u1", "u2"], Some(other)).await.unwrap();
        assert_eq!(outcome.room.participant_data, Some(data));
    }

    #[tokio::test]
    async fn listing_filters_by_membership() {
        let dir = directory().await;
        dir.create_or_get_room(["u1", "u2"], None).await.unwrap();
        dir.create_or_get_room(["u1", "u3"], None).await.unwrap();
        dir.create_or_get_room(["u2", "u3"], None).await.unwrap();
        // prefix of another id must not match
        dir.create_or_get_room(["u10", "u2"], None).await.unwrap();

        let mut ids: Vec<String> = dir
            .list_rooms_for_user("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["room-u1-u2", "room-u1-u3"]);
    }

    #[tokio::test]
    async fn connection_counts_never_go_negative() {
        let dir = directory().await;
        let room_id = dir.create_or_get_room(["u1", "u2"], None).await.unwrap().room_id;

        dir.update_connection_count(&room_id, 1, ConnectionAction::Enter).await.unwrap();
        dir.update_connection_count(&room_id, 1, ConnectionAction::Enter).await.unwrap();
        assert_eq!(dir.get_room(&room_id).await.unwrap().connections, 2);

        dir.update_connection_count(&room_id, -1, ConnectionAction::Leave).await.unwrap();
        dir.update_connection_count(&room_id, -5, ConnectionAction::Leave).await.unwrap();
        assert_eq!(dir.get_room(&room_id).await.unwrap().connections, 0);

        dir.update_connection_count(&room_id, 0, ConnectionAction::Delete).await.unwrap();
        assert!(matches!(
            dir.get_room(&room_id).await,
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_room_updates_report_not_found() {
        let dir = directory().await;
        let missing = RoomId::from("room-x-y");
        assert!(matches!(
            dir.update_connection_count(&missing, 1, ConnectionAction::Enter).await,
            Err(DirectoryError::NotFound(_))
        ));
        let preview = LastMessage {
            text: "hi".into(),
            from: "x".into(),
            at: 1,
        };
        assert!(matches!(
            dir.update_last_message_preview(&missing, &preview).await,
            Err(DirectoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn last_message_preview_is_cached() {
        let dir = directory().await;
        let room_id = dir.create_or_get_room(["u1", "u2"], None).await.unwrap().room_id;
        let preview = LastMessage {
            text: "hello".into(),
            from: "u1".into(),
            at: now_millis() + 10,
        };
        dir.update_last_message_preview(&room_id, &preview).await.unwrap();

        let room = dir.get_room(&room_id).await.unwrap();
        assert_eq!(room.last_message, Some(preview.clone()));
        assert_eq!(room.last_activity, preview.at);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = directory().await;
        let room_id = dir.create_or_get_room(["u1", "u2"], None).await.unwrap().room_id;
        assert!(dir.delete_room(&room_id).await.unwrap());
        assert!(!dir.delete_room(&room_id).await.unwrap());
    }

    #[tokio::test]
    async fn sweeps() {
        let dir = directory().await;
        let busy = dir.create_or_get_room(["u1", "u2"], None).await.unwrap().room_id;
        dir.create_or_get_room(["u1", "u3"], None).await.unwrap();
        dir.create_or_get_room(["test-1", "u9"], None).await.unwrap();
        dir.update_last_message_preview(
            &busy,
            &LastMessage {
                text: "hi".into(),
                from: "u1".into(),
                at: 1,
            },
        )
        .await
        .unwrap();

        assert_eq!(dir.cleanup(Sweep::TestRooms).await.unwrap(), 1);
        assert_eq!(dir.cleanup(Sweep::EmptyRooms).await.unwrap(), 1);
        assert!(dir.get_room(&busy).await.is_ok());
    }

    #[tokio::test]
    async fn creation_requests_provisioning() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dir = directory().await.with_provisioner(tx);

        let room_id = dir.create_or_get_room(["u1", "u2"], None).await.unwrap().room_id;
        dir.create_or_get_room(["u1", "u2"], None).await.unwrap();

        assert_eq!(rx.recv().await, Some(room_id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_provisioner_is_not_fatal() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let dir = directory().await.with_provisioner(tx);
        assert!(dir.create_or_get_room(["u1", "u2"], None).await.is_ok());
    }
}
