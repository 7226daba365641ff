//! Client side of a room: optimistic sends, reconciliation with the server log,
//! typing debounce, and the transports that feed them.

mod directory;
mod reconcile;
mod selection;
mod store;
mod transport;
mod typing;

pub use directory::DirectoryClient;
pub use reconcile::{merge_snapshot, Merged};
pub use selection::{Selection, SelectionStore};
pub use store::{ClientStore, ConnectionStatus, Delivery, Envelope, Notice};
pub use transport::{open, room_url, RoomSocket};
pub use typing::{TypingIndicator, TypingSignal, TYPING_IDLE};

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::clock::now_millis;
use crate::directory::RoomId;
use crate::error::ChatError;
use crate::protocol::{validate_text, ClientFrame, Profile, ServerFrame};

struct Shared {
    store: Mutex<ClientStore>,
    typing: Mutex<TypingIndicator>,
    /// Bumped after every store mutation so callers can wait for changes.
    revision: watch::Sender<u64>,
}

impl Shared {
    fn update<R>(&self, f: impl FnOnce(&mut ClientStore) -> R) -> R {
        let out = f(&mut self.store.lock());
        self.revision.send_modify(|rev| *rev += 1);
        out
    }
}

/// One user's view of one room at a time.
///
/// Owns the [`ClientStore`] and keeps it in step with a room session over a
/// websocket. Sends are optimistic: the message shows up immediately as
/// `Sending` and is upgraded when the server echoes it back.
pub struct ChatClient {
    base: Url,
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    tasks: Vec<JoinHandle<()>>,
    selection: Option<SelectionStore>,
}

impl ChatClient {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            shared: Arc::new(Shared {
                store: Mutex::new(ClientStore::new()),
                typing: Mutex::new(TypingIndicator::default()),
                revision: watch::channel(0).0,
            }),
            outbound: None,
            tasks: Vec::new(),
            selection: None,
        }
    }

    /// Remember the selected room per user so it can be restored on start.
    pub fn with_selection(mut self, selection: SelectionStore) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Opens a session for `room_id`, replacing any current connection.
    ///
    /// Messages still pending from an earlier connection to the same room are
    /// sent again; the server drops the ones it already committed.
    pub async fn connect(&mut self, room_id: RoomId, user: Profile) -> Result<(), ChatError> {
        self.disconnect();
        self.shared
            .update(|s| s.enter_room(room_id.clone(), user.clone()));

        let socket = match transport::open(&self.base, &room_id, &user).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "could not open room socket");
                self.shared
                    .update(|s| s.set_status(ConnectionStatus::Disconnected));
                return Err(err);
            }
        };
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::unbounded_channel();

        self.shared
            .update(|s| s.set_status(ConnectionStatus::Connected));
        self.tasks.push(tokio::spawn(write_frames(sink, rx)));
        self.tasks
            .push(tokio::spawn(read_frames(stream, self.shared.clone())));
        self.outbound = Some(tx);
        self.resend_pending();

        if let Some(selection) = &self.selection
            && let Err(err) = selection.save(&user.id, &room_id).await
        {
            warn!(user_id = %user.id, error = %err, "could not save room selection");
        }

        info!(room_id = %room_id, user_id = %user.id, "connected to room");
        Ok(())
    }

    /// Connects the store to a caller-provided transport instead of a websocket.
    ///
    /// Outgoing frames are delivered on the returned receiver; incoming ones
    /// go through [`ChatClient::receive`].
    pub fn attach(
        &mut self,
        room_id: RoomId,
        user: Profile,
    ) -> mpsc::UnboundedReceiver<ClientFrame> {
        self.disconnect();
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.update(|s| {
            s.enter_room(room_id, user);
            s.set_status(ConnectionStatus::Connected);
        });
        self.outbound = Some(tx);
        self.resend_pending();
        rx
    }

    pub fn receive(&self, frame: ServerFrame) {
        self.shared.update(|s| s.apply(frame, now_millis()));
    }

    /// Restores the room last selected by `user_id`, if one was saved and is
    /// still well formed.
    pub async fn restore_selection(&self, user_id: &str) -> Option<RoomId> {
        self.selection.as_ref()?.restore(user_id).await
    }

    pub fn disconnect(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.shared.typing.lock().cancel();
        if self.outbound.take().is_some() {
            self.shared
                .update(|s| s.set_status(ConnectionStatus::Disconnected));
        }
    }

    /// Adds `text` optimistically and hands it to the transport.
    ///
    /// Returns the new message id. A message that cannot be handed over stays
    /// `Sending` and goes out again on the next connect.
    pub fn send_message(&self, text: &str) -> Result<String, ChatError> {
        let id = self.shared.update(|s| s.stage_message(text, now_millis()))?;
        self.stop_typing();

        let frame = ClientFrame::Message {
            id: id.clone(),
            text: text.to_string(),
        };
        match self.transmit(frame) {
            Ok(()) => self.shared.update(|s| s.mark_sent(&id)),
            Err(err) => debug!(message_id = %id, error = %err, "message queued until reconnect"),
        }
        Ok(id)
    }

    pub fn edit_message(&self, message_id: &str, text: &str) -> Result<(), ChatError> {
        if let Err(err) = validate_text(text) {
            self.shared.update(|s| {
                s.notice(err.to_string(), now_millis(), Some(message_id.to_string()))
            });
            return Err(err.into());
        }
        self.transmit(ClientFrame::EditMessage {
            message_id: message_id.to_string(),
            text: text.to_string(),
        })
    }

    pub fn delete_message(&self, message_id: &str) -> Result<(), ChatError> {
        self.transmit(ClientFrame::DeleteMessage {
            message_id: message_id.to_string(),
        })
    }

    pub fn delete_room(&self) -> Result<(), ChatError> {
        self.transmit(ClientFrame::DeleteRoom)
    }

    /// Call on every keystroke in the composer.
    ///
    /// Sends "typing" on the first keystroke after idle and "stopped typing"
    /// once keystrokes pause for [`TYPING_IDLE`].
    pub fn keystroke(&self) {
        let signal = self.shared.typing.lock().keystroke(Instant::now());
        if let Some(signal) = signal {
            if self.transmit(signal.frame()).is_err() {
                return;
            }
            self.spawn_typing_timer();
        }
    }

    fn stop_typing(&self) {
        let signal = self.shared.typing.lock().cancel();
        if let Some(signal) = signal {
            let _ = self.transmit(signal.frame());
        }
    }

    fn spawn_typing_timer(&self) {
        let Some(tx) = self.outbound.clone() else {
            return;
        };
        let shared = self.shared.clone();
        tokio::spawn(async move {
            loop {
                let deadline = shared.typing.lock().deadline();
                let Some(deadline) = deadline else {
                    break;
                };
                tokio::time::sleep_until(deadline).await;

                let signal = shared.typing.lock().poll(Instant::now());
                if let Some(signal) = signal {
                    let _ = tx.send(signal.frame());
                    break;
                }
            }
        });
    }

    fn resend_pending(&self) {
        let pending = self.shared.store.lock().pending_frames();
        for frame in pending {
            let id = match &frame {
                ClientFrame::Message { id, .. } => Some(id.clone()),
                _ => None,
            };
            if self.transmit(frame).is_ok()
                && let Some(id) = id
            {
                self.shared.update(|s| s.mark_sent(&id));
            }
        }
    }

    fn transmit(&self, frame: ClientFrame) -> Result<(), ChatError> {
        let tx = self.outbound.as_ref().ok_or(ChatError::NotConnected)?;
        tx.send(frame).map_err(|_| ChatError::NotConnected)
    }

    pub fn with_store<R>(&self, f: impl FnOnce(&ClientStore) -> R) -> R {
        f(&self.shared.store.lock())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.with_store(|s| s.status())
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Waits until `pred` holds for the store, or `timeout` elapses.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&ClientStore) -> bool,
    ) -> bool {
        let mut changes = self.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                if self.with_store(&mut pred) {
                    return;
                }
                if changes.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;

        waited.is_ok() && self.with_store(&mut pred)
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn write_frames<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<ClientFrame>)
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                error!(frame = frame.name(), error = %err, "could not encode frame");
                continue;
            }
        };
        if let Err(err) = sink.send(WsMessage::text(text)).await {
            debug!(error = %err, "room socket closed while sending");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_frames<S>(mut stream: S, shared: Arc<Shared>)
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match ServerFrame::decode(text.as_str()) {
                Ok(frame) => shared.update(|s| s.apply(frame, now_millis())),
                Err(err) => error!(error = %err, "undecodable frame from server"),
            },
            Ok(WsMessage::Close(close)) => {
                debug!(?close, "room socket closed by server");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "room socket failed");
                break;
            }
        }
    }
    shared.update(|s| s.set_status(ConnectionStatus::Disconnected));
}
