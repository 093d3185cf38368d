//! The synchronization coordinator.
//!
//! [`SyncCoordinator`] is the only writer of the client's stores. Commands
//! validate against local state, issue their hub request with no lock held,
//! and apply the acknowledged result afterwards; nothing is mutated
//! optimistically, so a failed request needs no rollback. Push events are
//! decoded, routed by event name and merged under the same lock. Every change
//! republishes a [`ReadModel`] on a watch channel.
//!
//! Commands may be in flight concurrently. Each resolves and merges on its
//! own; idempotent store mutations make the merged result independent of
//! completion order.

use std::collections::{BTreeSet, HashMap, HashSet};

use roomsync_core::{Environment, Message, MessageId, Room, RoomId, UserId};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::{
    Account, CommandOutcome, ConnectionState, EventName, Hub, HubSignal, JoinAck, PushEvent,
    RawPush, ReadModel, ResyncSnapshot, RoomContents, RoomPhase, RoomView, SyncConfig, SyncError,
    SyncState,
};

/// State guarded by the coordinator lock.
struct Inner<I> {
    state: SyncState<I>,
    version: u64,
    subscriptions: BTreeSet<EventName>,
    typing_notices: HashMap<RoomId, I>,
}

/// Orchestrates hub requests, push events and resync over the local stores.
///
/// # Type Parameters
///
/// - `H`: remote hub client
/// - `A`: current-user provider
/// - `E`: clock, real or simulated
pub struct SyncCoordinator<H, A, E>
where
    H: Hub,
    A: Account,
    E: Environment,
{
    hub: H,
    account: A,
    env: E,
    config: SyncConfig,
    inner: Mutex<Inner<E::Instant>>,
    published: watch::Sender<ReadModel<E::Instant>>,
}

fn request_failed<Err>(operation: &'static str) -> impl FnOnce(Err) -> SyncError
where
    Err: std::error::Error,
{
    move |err| {
        warn!(operation, error = %err, "hub request failed");
        SyncError::RequestFailed { operation, reason: err.to_string() }
    }
}

fn not_joined(operation: &'static str, room_id: &RoomId) -> SyncError {
    SyncError::invalid(operation, format!("room {room_id} is not joined"))
}

impl<H, A, E> SyncCoordinator<H, A, E>
where
    H: Hub,
    A: Account,
    E: Environment,
{
    /// Coordinator with empty stores, subscribed to every push event.
    pub fn new(hub: H, account: A, env: E, config: SyncConfig) -> Self {
        let state = SyncState::new(account.current_user(), config.typing_ttl);
        let (published, _) = watch::channel(ReadModel::empty());
        let inner = Inner {
            state,
            version: 0,
            subscriptions: EventName::ALL.into_iter().collect(),
            typing_notices: HashMap::new(),
        };

        Self { hub, account, env, config, inner: Mutex::new(inner), published }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Clock in use.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Hub client in use.
    pub fn hub(&self) -> &H {
        &self.hub
    }

    /// Identifier of the current user.
    pub fn current_user_id(&self) -> UserId {
        self.account.current_user_id()
    }

    /// Receiver that observes every published read model.
    pub fn watch(&self) -> watch::Receiver<ReadModel<E::Instant>> {
        self.published.subscribe()
    }

    /// Latest published read model.
    pub fn snapshot(&self) -> ReadModel<E::Instant> {
        self.published.borrow().clone()
    }

    /// Run a read-only closure against the current state.
    pub async fn with_state<R>(&self, f: impl FnOnce(&SyncState<E::Instant>) -> R) -> R {
        let inner = self.inner.lock().await;
        f(&inner.state)
    }

    /// Full view of any listed room, joined or not.
    pub async fn room_view(&self, room_id: &RoomId) -> Option<RoomView<E::Instant>> {
        let now = self.env.now();
        self.with_state(|state| state.room_view(room_id, now)).await
    }

    /// Lifecycle position of a room.
    pub async fn phase(&self, room_id: &RoomId) -> RoomPhase {
        self.with_state(|state| state.phase(room_id)).await
    }

    /// Fetch the full room listing and replace the directory.
    ///
    /// Rooms created, joined, left or deleted while the fetch was in flight
    /// keep their local state.
    pub async fn load_directory(&self) -> Result<(), SyncError> {
        let fence = self.with_state(SyncState::fence).await;
        let rooms = self.hub.get_all_rooms().await.map_err(request_failed("GetAllRooms"))?;
        let count = rooms.len();
        self.apply(move |inner, _| inner.state.apply_listing(rooms, fence)).await;
        info!(count, "room directory loaded");
        Ok(())
    }

    /// Create a room. The creator is joined and the room becomes active.
    pub async fn create_room(&self, name: &str) -> Result<Room, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::invalid("create room", "room name is blank"));
        }

        let room = self.hub.create_room(name).await.map_err(request_failed("CreateRoom"))?;
        info!(room_id = %room.id, name, "room created");

        let created = room.clone();
        self.apply(move |inner, _| {
            inner.state.apply_created_room(created);
        })
        .await;
        Ok(room)
    }

    /// Join a room and load its history.
    ///
    /// A room the directory does not list is looked up afterwards; if that
    /// lookup fails a placeholder is listed so membership never references a
    /// room the directory lacks. The participant set is fetched as well.
    pub async fn join_room(&self, room_id: &RoomId) -> Result<CommandOutcome, SyncError> {
        if room_id.is_blank() {
            return Err(SyncError::invalid("join room", "room id is blank"));
        }
        let (joined, listed) = self
            .with_state(|state| {
                (state.membership().is_joined(room_id), state.directory().contains(room_id))
            })
            .await;
        if joined {
            debug!(%room_id, "already joined");
            return Ok(CommandOutcome::AlreadyResolved);
        }

        let history = self.hub.join_room(room_id).await.map_err(request_failed("JoinRoom"))?;

        let room = if listed {
            None
        } else {
            self.hub
                .get_room(room_id)
                .await
                .inspect_err(|err| warn!(%room_id, error = %err, "room lookup failed"))
                .ok()
        };
        let participants = self
            .hub
            .get_participants(room_id)
            .await
            .inspect_err(|err| warn!(%room_id, error = %err, "participant lookup failed"))
            .ok();

        let activate = self.config.activate_on_join;
        let ack = JoinAck { room_id: room_id.clone(), room, history, participants };
        if self.merge(move |state, _| state.apply_joined(ack, activate)).await {
            Ok(CommandOutcome::Applied)
        } else {
            Ok(CommandOutcome::AlreadyResolved)
        }
    }

    /// Leave a room. Leaving a room that is not joined is already resolved.
    pub async fn leave_room(&self, room_id: &RoomId) -> Result<CommandOutcome, SyncError> {
        let joined = self.with_state(|state| state.membership().is_joined(room_id)).await;
        if !joined {
            debug!(%room_id, "not joined, nothing to leave");
            return Ok(CommandOutcome::AlreadyResolved);
        }

        self.hub.leave_room(room_id).await.map_err(request_failed("LeaveRoom"))?;
        self.apply(|inner, _| {
            inner.state.apply_left(room_id);
            inner.typing_notices.remove(room_id);
        })
        .await;
        Ok(CommandOutcome::Applied)
    }

    /// Send a message to a joined, writable room.
    ///
    /// Returns the hub's stored copy. Its later push echo merges as a no-op.
    pub async fn send_message(&self, room_id: &RoomId, text: &str) -> Result<Message, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::invalid("send message", "message text is blank"));
        }
        self.with_state(|state| {
            if !state.membership().is_joined(room_id) {
                return Err(not_joined("send message", room_id));
            }
            if state.directory().get(room_id).is_some_and(|room| room.read_only) {
                let reason = format!("room {room_id} is read-only");
                return Err(SyncError::invalid("send message", reason));
            }
            Ok(())
        })
        .await?;

        let message =
            self.hub.send_message(room_id, text).await.map_err(request_failed("SendMessage"))?;
        debug!(%room_id, message_id = %message.id, "message sent");

        let merged = message.clone();
        self.merge(move |state, now| state.apply_message(merged, now)).await;
        Ok(message)
    }

    /// Replace a held message's content. The hub's stored copy, stamped by
    /// the hub, is merged like an edit push.
    pub async fn edit_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
        text: &str,
    ) -> Result<CommandOutcome, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::invalid("edit message", "message text is blank"));
        }
        let held =
            self.with_state(|state| state.conversations().contains(room_id, message_id)).await;
        if !held {
            debug!(%room_id, %message_id, "edit target not held");
            return Ok(CommandOutcome::AlreadyResolved);
        }

        let edited = self
            .hub
            .edit_message(room_id, message_id, text)
            .await
            .map_err(request_failed("EditMessage"))?;
        debug!(%room_id, %message_id, updated_at = edited.updated_at, "message edited");

        self.merge(move |state, _| state.apply_edit(&edited)).await;
        Ok(CommandOutcome::Applied)
    }

    /// Delete a held message.
    pub async fn delete_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
    ) -> Result<CommandOutcome, SyncError> {
        let held =
            self.with_state(|state| state.conversations().contains(room_id, message_id)).await;
        if !held {
            debug!(%room_id, %message_id, "delete target not held");
            return Ok(CommandOutcome::AlreadyResolved);
        }

        self.hub.delete_message(message_id).await.map_err(request_failed("DeleteMessage"))?;
        self.merge(|state, _| state.apply_delete(room_id, message_id)).await;
        Ok(CommandOutcome::Applied)
    }

    /// Announce that the current user is typing.
    ///
    /// At most one notice per room is sent per `typing_notice_interval`;
    /// throttled calls return `Ok(false)` without a request.
    pub async fn notify_typing(&self, room_id: &RoomId) -> Result<bool, SyncError> {
        let now = self.env.now();
        let interval = self.config.typing_notice_interval;
        {
            let mut inner = self.inner.lock().await;
            if !inner.state.membership().is_joined(room_id) {
                return Err(not_joined("notify typing", room_id));
            }
            if inner.typing_notices.get(room_id).is_some_and(|&last| now < last + interval) {
                debug!(%room_id, "typing notice throttled");
                return Ok(false);
            }
            inner.typing_notices.insert(room_id.clone(), now);
        }

        if let Err(err) = self.hub.notify_typing(room_id).await {
            self.inner.lock().await.typing_notices.remove(room_id);
            return Err(request_failed("NotifyTyping")(err));
        }
        Ok(true)
    }

    /// Announce that the current user stopped typing. Resets the throttle.
    pub async fn notify_stopped_typing(&self, room_id: &RoomId) -> Result<(), SyncError> {
        {
            let mut inner = self.inner.lock().await;
            if !inner.state.membership().is_joined(room_id) {
                return Err(not_joined("notify stopped typing", room_id));
            }
            inner.typing_notices.remove(room_id);
        }

        self.hub
            .notify_stopped_typing(room_id)
            .await
            .map_err(request_failed("NotifyStoppedTyping"))
    }

    /// Focus a joined room, or clear focus with `None`.
    pub async fn set_active(&self, room_id: Option<&RoomId>) -> Result<(), SyncError> {
        let now = self.env.now();
        let mut inner = self.inner.lock().await;
        inner.state.set_active(room_id)?;
        self.publish(&mut inner, now);
        Ok(())
    }

    /// Route one raw push to its merge handler.
    ///
    /// Never fails: malformed pushes and pushes for unsubscribed events are
    /// logged and dropped. Returns whether the stores changed.
    pub async fn handle_push(&self, raw: &RawPush) -> bool {
        let event = match PushEvent::decode(raw) {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "dropping push");
                return false;
            },
        };

        let name = event.name();
        let now = self.env.now();
        let mut inner = self.inner.lock().await;
        if !inner.subscriptions.contains(&name) {
            debug!(event = %name, "not subscribed, push dropped");
            return false;
        }

        let changed = inner.state.apply_push(event, now);
        if changed {
            self.publish(&mut inner, now);
        }
        changed
    }

    /// Handle one transport signal. Only a failed resync returns an error.
    pub async fn handle_signal(&self, signal: HubSignal) -> Result<(), SyncError> {
        match signal {
            HubSignal::Push(raw) => {
                self.handle_push(&raw).await;
                Ok(())
            },
            HubSignal::Disconnected => {
                info!("transport disconnected");
                self.set_connection(ConnectionState::Disconnected).await;
                Ok(())
            },
            HubSignal::Reconnected => self.resync().await,
        }
    }

    /// Re-fetch the listing and, for every joined room, its history and
    /// participants, replacing what is held.
    ///
    /// On failure nothing is replaced and the connection is marked stale.
    /// Rooms changed while the fetch was in flight keep their local state.
    pub async fn resync(&self) -> Result<(), SyncError> {
        info!("resync started");
        self.set_connection(ConnectionState::Resyncing).await;
        let fence = self.with_state(SyncState::fence).await;

        match self.fetch_resync().await {
            Ok(snapshot) => {
                let rooms = snapshot.rooms.len();
                let joined = snapshot.joined.len();
                self.apply(move |inner, _| inner.state.apply_resync(snapshot, fence)).await;
                info!(rooms, joined, "resync complete");
                Ok(())
            },
            Err(err) => {
                self.set_connection(ConnectionState::Stale).await;
                Err(err)
            },
        }
    }

    /// Remove elapsed typing entries. Returns whether any were removed.
    pub async fn sweep_typing(&self) -> bool {
        self.merge(|state, now| state.sweep(now)).await
    }

    /// Route pushes with this name again. Returns `false` if already routed.
    pub async fn subscribe(&self, name: EventName) -> bool {
        self.inner.lock().await.subscriptions.insert(name)
    }

    /// Stop routing pushes with this name. Returns `false` if not routed.
    pub async fn unsubscribe(&self, name: EventName) -> bool {
        self.inner.lock().await.subscriptions.remove(&name)
    }

    async fn fetch_resync(&self) -> Result<ResyncSnapshot, SyncError> {
        let rooms = self.hub.get_all_rooms().await.map_err(request_failed("GetAllRooms"))?;
        let me = self.account.current_user_id();
        let held: HashSet<RoomId> =
            self.with_state(|state| state.membership().joined().cloned().collect()).await;

        // Rooms held as joined, plus rooms whose summary lists this user.
        let candidates: Vec<RoomId> = rooms
            .iter()
            .filter(|room| held.contains(&room.id) || room.lists_participant(&me))
            .map(|room| room.id.clone())
            .collect();

        let mut joined = Vec::new();
        let mut departed = Vec::new();
        for room_id in candidates {
            let participants = self
                .hub
                .get_participants(&room_id)
                .await
                .map_err(request_failed("GetParticipants"))?;
            if !participants.iter().any(|p| p.user_id == me) {
                departed.push(room_id);
                continue;
            }
            let history =
                self.hub.get_history(&room_id).await.map_err(request_failed("GetHistory"))?;
            joined.push(RoomContents { room_id, history, participants });
        }

        Ok(ResyncSnapshot { rooms, joined, departed })
    }

    async fn set_connection(&self, connection: ConnectionState) {
        self.merge(|state, _| state.set_connection(connection)).await;
    }

    /// Apply an acknowledged result and publish unconditionally.
    async fn apply(&self, f: impl FnOnce(&mut Inner<E::Instant>, E::Instant)) {
        let now = self.env.now();
        let mut inner = self.inner.lock().await;
        f(&mut inner, now);
        self.publish(&mut inner, now);
    }

    /// Merge into the state and publish if anything changed.
    async fn merge(&self, f: impl FnOnce(&mut SyncState<E::Instant>, E::Instant) -> bool) -> bool {
        let now = self.env.now();
        let mut inner = self.inner.lock().await;
        let changed = f(&mut inner.state, now);
        if changed {
            self.publish(&mut inner, now);
        }
        changed
    }

    fn publish(&self, inner: &mut Inner<E::Instant>, now: E::Instant) {
        inner.version += 1;
        self.published.send_replace(inner.state.read_model(inner.version, now));
    }
}
