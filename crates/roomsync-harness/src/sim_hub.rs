//! In-memory authoritative hub for simulation.
//!
//! `SimHub` plays the remote side: it answers requests, assigns identifiers
//! and timestamps, and fans push events out to connected users in JSON wire
//! form. Nothing is delivered on its own. Tests pull queued pushes with
//! [`SharedSimHub::take_pushes`] and feed them to clients in whatever order
//! they want to exercise.
//!
//! Each user's queue is FIFO, so pushes about one room keep their order.
//! Disconnecting a user discards their queue and drops pushes until they
//! reconnect; requests from a disconnected user fail.
//!
//! A reply can be held back with [`SharedSimHub::hold_reply`]: the hub
//! applies the request and queues its pushes at once, but the caller only
//! sees the reply after [`HeldReply::release`]. Tests use this to land
//! pushes and other commands while a request is in flight.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rand::Rng;
use roomsync_client::{Hub, PushEvent, RawPush};
use roomsync_core::{Environment, Message, MessageId, Participant, Room, RoomId, Timestamp, UserId};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::SimEnv;

/// Errors returned by the simulated hub.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimHubError {
    /// The user never connected.
    #[error("user {0} is not registered")]
    UnknownUser(UserId),
    /// The user's transport is down.
    #[error("user {0} is disconnected")]
    Disconnected(UserId),
    /// A failure queued by [`SharedSimHub::fail_next`].
    #[error("injected failure for {0}")]
    Injected(&'static str),
    /// No room with this identifier.
    #[error("no such room {0}")]
    NoSuchRoom(RoomId),
    /// No message with this identifier.
    #[error("no such message {0}")]
    NoSuchMessage(MessageId),
    /// The user is not a member of the room.
    #[error("not a member of room {0}")]
    NotAMember(RoomId),
    /// The room accepts no messages.
    #[error("room {0} is read-only")]
    ReadOnly(RoomId),
    /// Only a message's author may change it.
    #[error("only the author may change message {0}")]
    NotAuthor(MessageId),
}

/// A push waiting in a user's queue, tagged with the room it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPush {
    /// Room the push is about.
    pub room_id: RoomId,
    /// Wire form.
    pub push: RawPush,
}

#[derive(Debug)]
struct HubRoom {
    room: Room,
    history: Vec<Message>,
    members: BTreeMap<UserId, Participant>,
}

#[derive(Debug)]
struct Slot {
    profile: Participant,
    connected: bool,
    outbox: VecDeque<PendingPush>,
    failures: Vec<&'static str>,
    holds: Vec<Hold>,
}

/// Hub side of a held reply.
#[derive(Debug)]
struct Hold {
    operation: &'static str,
    arrived: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

impl Hold {
    async fn park(self) {
        if self.arrived.send(()).is_ok() && self.release.await.is_err() {
            debug!(operation = self.operation, "held reply abandoned");
        }
    }
}

/// Test side of a held reply, from [`SharedSimHub::hold_reply`].
///
/// Dropping it releases the reply as well.
#[derive(Debug)]
pub struct HeldReply {
    arrived: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl HeldReply {
    /// Wait until the hub has applied the request and parked its reply.
    ///
    /// Returns `false` if the hold was dropped before any request matched.
    pub async fn arrived(&mut self) -> bool {
        (&mut self.arrived).await.is_ok()
    }

    /// Let the parked reply through.
    pub fn release(self) {
        if self.release.send(()).is_err() {
            debug!("no parked reply to release");
        }
    }
}

/// Authoritative hub state.
#[derive(Debug)]
pub struct SimHub {
    env: SimEnv,
    rooms: Vec<HubRoom>,
    users: BTreeMap<UserId, Slot>,
    next_room: u64,
    next_message: u64,
    last_stamp: Timestamp,
}

impl SimHub {
    /// Empty hub stamping with the given clock.
    pub fn new(env: SimEnv) -> Self {
        Self {
            env,
            rooms: Vec::new(),
            users: BTreeMap::new(),
            next_room: 1,
            next_message: 1,
            last_stamp: 0,
        }
    }

    /// Rooms in creation order.
    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.iter().map(|r| r.room.clone()).collect()
    }

    /// Authoritative history of a room.
    pub fn history(&self, room_id: &RoomId) -> Vec<Message> {
        self.room(room_id).map(|r| r.history.clone()).unwrap_or_default()
    }

    /// Authoritative members of a room.
    pub fn members(&self, room_id: &RoomId) -> Vec<Participant> {
        self.room(room_id).map(|r| r.members.values().cloned().collect()).unwrap_or_default()
    }

    /// Rooms the user is a member of, in creation order.
    pub fn memberships(&self, user_id: &UserId) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|r| r.members.contains_key(user_id))
            .map(|r| r.room.id.clone())
            .collect()
    }

    /// Whether the user's transport is up.
    pub fn is_connected(&self, user_id: &UserId) -> bool {
        self.users.get(user_id).is_some_and(|slot| slot.connected)
    }

    /// Number of pushes queued for the user.
    pub fn pending(&self, user_id: &UserId) -> usize {
        self.users.get(user_id).map_or(0, |slot| slot.outbox.len())
    }

    fn take_hold(&mut self, user_id: &UserId, operation: &'static str) -> Option<Hold> {
        let holds = &mut self.users.get_mut(user_id)?.holds;
        let pos = holds.iter().position(|hold| hold.operation == operation)?;
        Some(holds.remove(pos))
    }

    fn room(&self, room_id: &RoomId) -> Option<&HubRoom> {
        self.rooms.iter().find(|r| r.room.id == *room_id)
    }

    fn room_mut(&mut self, room_id: &RoomId) -> Result<&mut HubRoom, SimHubError> {
        self.rooms
            .iter_mut()
            .find(|r| r.room.id == *room_id)
            .ok_or_else(|| SimHubError::NoSuchRoom(room_id.clone()))
    }

    fn stamp(&mut self) -> Timestamp {
        let now = self.env.wall_clock_millis().max(self.last_stamp + 1);
        self.last_stamp = now;
        now
    }

    /// Admission check run before every request.
    fn admit(
        &mut self,
        user_id: &UserId,
        operation: &'static str,
    ) -> Result<Participant, SimHubError> {
        let slot =
            self.users.get_mut(user_id).ok_or_else(|| SimHubError::UnknownUser(user_id.clone()))?;
        if !slot.connected {
            return Err(SimHubError::Disconnected(user_id.clone()));
        }
        if let Some(pos) = slot.failures.iter().position(|op| *op == operation) {
            slot.failures.remove(pos);
            return Err(SimHubError::Injected(operation));
        }
        Ok(slot.profile.clone())
    }

    fn require_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<(), SimHubError> {
        let room = self.room(room_id).ok_or_else(|| SimHubError::NoSuchRoom(room_id.clone()))?;
        if room.members.contains_key(user_id) {
            Ok(())
        } else {
            Err(SimHubError::NotAMember(room_id.clone()))
        }
    }

    fn enqueue(&mut self, recipients: &[UserId], event: &PushEvent) {
        let push = match event.encode() {
            Ok(push) => push,
            Err(err) => {
                tracing::warn!(event = %event.name(), error = %err, "push not encodable");
                return;
            },
        };
        let room_id = event.room_id().clone();
        for user_id in recipients {
            if let Some(slot) = self.users.get_mut(user_id).filter(|slot| slot.connected) {
                slot.outbox.push_back(PendingPush { room_id: room_id.clone(), push: push.clone() });
            }
        }
    }

    fn everyone(&self) -> Vec<UserId> {
        self.users.keys().cloned().collect()
    }

    fn members_of(&self, room_id: &RoomId) -> Vec<UserId> {
        self.room(room_id).map(|r| r.members.keys().cloned().collect()).unwrap_or_default()
    }

    fn get_all_rooms(&mut self, user_id: &UserId) -> Result<Vec<Room>, SimHubError> {
        self.admit(user_id, "GetAllRooms")?;
        Ok(self.rooms())
    }

    fn get_room(&mut self, user_id: &UserId, room_id: &RoomId) -> Result<Room, SimHubError> {
        self.admit(user_id, "GetRoom")?;
        self.room(room_id)
            .map(|r| r.room.clone())
            .ok_or_else(|| SimHubError::NoSuchRoom(room_id.clone()))
    }

    fn create_room(&mut self, user_id: &UserId, name: &str) -> Result<Room, SimHubError> {
        let profile = self.admit(user_id, "CreateRoom")?;
        let at = self.stamp();
        let mut room = Room::new(format!("room-{}", self.next_room), name, at);
        self.next_room += 1;
        room.participant_ids.push(user_id.clone());

        let members = BTreeMap::from([(user_id.clone(), profile)]);
        self.rooms.push(HubRoom { room: room.clone(), history: Vec::new(), members });

        let everyone = self.everyone();
        self.enqueue(&everyone, &PushEvent::RoomCreated(room.clone()));
        Ok(room)
    }

    fn join_room(
        &mut self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Vec<Message>, SimHubError> {
        let profile = self.admit(user_id, "JoinRoom")?;
        let at = self.stamp();
        let room = self.room_mut(room_id)?;
        if room.members.contains_key(user_id) {
            return Ok(room.history.clone());
        }

        room.members.insert(user_id.clone(), profile.clone());
        room.room.participant_ids.push(user_id.clone());
        room.room.updated_at = at;
        let history = room.history.clone();

        let members = self.members_of(room_id);
        self.enqueue(
            &members,
            &PushEvent::ParticipantJoined { room_id: room_id.clone(), participant: profile },
        );
        Ok(history)
    }

    fn leave_room(&mut self, user_id: &UserId, room_id: &RoomId) -> Result<(), SimHubError> {
        self.admit(user_id, "LeaveRoom")?;
        let at = self.stamp();
        let members = self.members_of(room_id);
        let room = self.room_mut(room_id)?;
        if room.members.remove(user_id).is_none() {
            return Ok(());
        }
        room.room.participant_ids.retain(|id| id != user_id);
        room.room.updated_at = at;

        self.enqueue(
            &members,
            &PushEvent::ParticipantLeft { room_id: room_id.clone(), user_id: user_id.clone() },
        );
        Ok(())
    }

    fn send_message(
        &mut self,
        user_id: &UserId,
        room_id: &RoomId,
        text: &str,
    ) -> Result<Message, SimHubError> {
        let profile = self.admit(user_id, "SendMessage")?;
        self.require_member(room_id, user_id)?;
        let at = self.stamp();
        let id = MessageId::new(format!("msg-{}", self.next_message));
        self.next_message += 1;

        let room = self.room_mut(room_id)?;
        if room.room.read_only {
            return Err(SimHubError::ReadOnly(room_id.clone()));
        }
        let message = Message {
            id,
            room_id: room_id.clone(),
            author_id: user_id.clone(),
            author_name: profile.display_name,
            author_avatar: profile.avatar_url,
            content: text.to_owned(),
            created_at: at,
            updated_at: at,
            is_system: false,
        };
        room.history.push(message.clone());

        let members = self.members_of(room_id);
        self.enqueue(&members, &PushEvent::MessageCreated(message.clone()));
        Ok(message)
    }

    fn edit_message(
        &mut self,
        user_id: &UserId,
        room_id: &RoomId,
        message_id: &MessageId,
        text: &str,
    ) -> Result<Message, SimHubError> {
        self.admit(user_id, "EditMessage")?;
        let at = self.stamp();
        let room = self.room_mut(room_id)?;
        let message = room
            .history
            .iter_mut()
            .find(|m| m.id == *message_id)
            .ok_or_else(|| SimHubError::NoSuchMessage(message_id.clone()))?;
        if message.author_id != *user_id {
            return Err(SimHubError::NotAuthor(message_id.clone()));
        }
        text.clone_into(&mut message.content);
        message.updated_at = at;
        let edited = message.clone();

        let members = self.members_of(room_id);
        self.enqueue(&members, &PushEvent::MessageEdited(edited.clone()));
        Ok(edited)
    }

    fn delete_message(
        &mut self,
        user_id: &UserId,
        message_id: &MessageId,
    ) -> Result<(), SimHubError> {
        self.admit(user_id, "DeleteMessage")?;
        let (room_idx, pos) = self
            .rooms
            .iter()
            .enumerate()
            .find_map(|(idx, r)| {
                r.history.iter().position(|m| m.id == *message_id).map(|pos| (idx, pos))
            })
            .ok_or_else(|| SimHubError::NoSuchMessage(message_id.clone()))?;

        let room = &mut self.rooms[room_idx];
        if room.history[pos].author_id != *user_id {
            return Err(SimHubError::NotAuthor(message_id.clone()));
        }
        room.history.remove(pos);
        let room_id = room.room.id.clone();

        let members = self.members_of(&room_id);
        self.enqueue(
            &members,
            &PushEvent::MessageDeleted { room_id, message_id: message_id.clone() },
        );
        Ok(())
    }

    fn typing(
        &mut self,
        user_id: &UserId,
        room_id: &RoomId,
        started: bool,
    ) -> Result<(), SimHubError> {
        self.admit(user_id, if started { "NotifyTyping" } else { "NotifyStoppedTyping" })?;
        self.require_member(room_id, user_id)?;
        let (room_id, user_id) = (room_id.clone(), user_id.clone());
        let event = if started {
            PushEvent::TypingStarted { room_id, user_id }
        } else {
            PushEvent::TypingStopped { room_id, user_id }
        };
        let members = self.members_of(event.room_id());
        self.enqueue(&members, &event);
        Ok(())
    }

    fn get_history(
        &mut self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Vec<Message>, SimHubError> {
        self.admit(user_id, "GetHistory")?;
        self.require_member(room_id, user_id)?;
        Ok(self.history(room_id))
    }

    fn get_participants(
        &mut self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<Vec<Participant>, SimHubError> {
        self.admit(user_id, "GetParticipants")?;
        self.room(room_id)
            .map(|r| r.members.values().cloned().collect())
            .ok_or_else(|| SimHubError::NoSuchRoom(room_id.clone()))
    }
}

/// Handle to a hub shared by every simulated client.
#[derive(Debug, Clone)]
pub struct SharedSimHub {
    inner: Arc<Mutex<SimHub>>,
}

impl SharedSimHub {
    /// Empty hub stamping with the given clock.
    pub fn new(env: SimEnv) -> Self {
        Self { inner: Arc::new(Mutex::new(SimHub::new(env))) }
    }

    fn lock(&self) -> MutexGuard<'_, SimHub> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a closure against the hub state.
    pub fn with_hub<R>(&self, f: impl FnOnce(&mut SimHub) -> R) -> R {
        f(&mut self.lock())
    }

    /// Register a user as connected and return their hub client.
    pub fn connect(&self, profile: Participant) -> SimHubClient {
        let user_id = profile.user_id.clone();
        self.lock().users.insert(
            user_id.clone(),
            Slot {
                profile,
                connected: true,
                outbox: VecDeque::new(),
                failures: Vec::new(),
                holds: Vec::new(),
            },
        );
        SimHubClient { hub: self.clone(), user_id }
    }

    /// Take the transport down. Queued pushes are lost.
    pub fn disconnect(&self, user_id: &UserId) {
        if let Some(slot) = self.lock().users.get_mut(user_id) {
            slot.connected = false;
            slot.outbox.clear();
        }
    }

    /// Bring the transport back up.
    pub fn reconnect(&self, user_id: &UserId) {
        if let Some(slot) = self.lock().users.get_mut(user_id) {
            slot.connected = true;
        }
    }

    /// Fail the user's next request of the named operation (`"SendMessage"`,
    /// `"JoinRoom"`, ...).
    pub fn fail_next(&self, user_id: &UserId, operation: &'static str) {
        if let Some(slot) = self.lock().users.get_mut(user_id) {
            slot.failures.push(operation);
        }
    }

    /// Hold back the reply to the user's next request of the named
    /// operation until the returned handle is released.
    pub fn hold_reply(&self, user_id: &UserId, operation: &'static str) -> HeldReply {
        let (arrived_tx, arrived) = oneshot::channel();
        let (release, release_rx) = oneshot::channel();
        if let Some(slot) = self.lock().users.get_mut(user_id) {
            slot.holds.push(Hold { operation, arrived: arrived_tx, release: release_rx });
        }
        HeldReply { arrived, release }
    }

    /// Drop the user's unmatched holds. Their [`HeldReply::arrived`] returns
    /// `false`.
    pub fn drop_holds(&self, user_id: &UserId) {
        if let Some(slot) = self.lock().users.get_mut(user_id) {
            slot.holds.clear();
        }
    }

    /// Drop every queued failure.
    pub fn clear_failures(&self) {
        for slot in self.lock().users.values_mut() {
            slot.failures.clear();
        }
    }

    /// Take up to `max` queued pushes for the user, oldest first.
    pub fn take_pushes(&self, user_id: &UserId, max: usize) -> Vec<PendingPush> {
        let mut hub = self.lock();
        let Some(slot) = hub.users.get_mut(user_id) else {
            return Vec::new();
        };
        let count = max.min(slot.outbox.len());
        slot.outbox.drain(..count).collect()
    }

    /// Queue an arbitrary push for the user, well-formed or not.
    pub fn inject(&self, user_id: &UserId, room_id: RoomId, push: RawPush) {
        if let Some(slot) = self.lock().users.get_mut(user_id) {
            slot.outbox.push_back(PendingPush { room_id, push });
        }
    }

    /// Delete a room out of band, pushing `room-deleted` to everyone.
    pub fn delete_room(&self, room_id: &RoomId) -> bool {
        let mut hub = self.lock();
        let before = hub.rooms.len();
        hub.rooms.retain(|r| r.room.id != *room_id);
        if hub.rooms.len() == before {
            return false;
        }
        let everyone = hub.everyone();
        hub.enqueue(&everyone, &PushEvent::RoomDeleted { room_id: room_id.clone() });
        true
    }

    /// Mark a room read-only out of band.
    pub fn set_read_only(&self, room_id: &RoomId, read_only: bool) -> bool {
        let mut hub = self.lock();
        let at = hub.stamp();
        match hub.room_mut(room_id) {
            Ok(room) => {
                room.room.read_only = read_only;
                room.room.updated_at = at;
                true
            },
            Err(_) => false,
        }
    }
}

/// One user's request channel to the shared hub.
#[derive(Debug, Clone)]
pub struct SimHubClient {
    hub: SharedSimHub,
    user_id: UserId,
}

impl SimHubClient {
    /// User this client acts as.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The shared hub.
    pub fn shared(&self) -> &SharedSimHub {
        &self.hub
    }
}

impl SimHubClient {
    /// Apply one request under the hub lock, then park the reply if a test
    /// holds it.
    async fn call<T: Send>(
        &self,
        operation: &'static str,
        request: impl FnOnce(&mut SimHub, &UserId) -> Result<T, SimHubError> + Send,
    ) -> Result<T, SimHubError> {
        tokio::task::yield_now().await;
        let (reply, hold) = {
            let mut hub = self.hub.lock();
            let reply = request(&mut hub, &self.user_id);
            (reply, hub.take_hold(&self.user_id, operation))
        };
        if let Some(hold) = hold {
            hold.park().await;
        }
        reply
    }
}

impl Hub for SimHubClient {
    type Error = SimHubError;

    async fn get_all_rooms(&self) -> Result<Vec<Room>, SimHubError> {
        self.call("GetAllRooms", SimHub::get_all_rooms).await
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Room, SimHubError> {
        self.call("GetRoom", |hub, user| hub.get_room(user, room_id)).await
    }

    async fn create_room(&self, name: &str) -> Result<Room, SimHubError> {
        self.call("CreateRoom", |hub, user| hub.create_room(user, name)).await
    }

    async fn join_room(&self, room_id: &RoomId) -> Result<Vec<Message>, SimHubError> {
        self.call("JoinRoom", |hub, user| hub.join_room(user, room_id)).await
    }

    async fn leave_room(&self, room_id: &RoomId) -> Result<(), SimHubError> {
        self.call("LeaveRoom", |hub, user| hub.leave_room(user, room_id)).await
    }

    async fn send_message(&self, room_id: &RoomId, text: &str) -> Result<Message, SimHubError> {
        self.call("SendMessage", |hub, user| hub.send_message(user, room_id, text)).await
    }

    async fn edit_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
        text: &str,
    ) -> Result<Message, SimHubError> {
        self.call("EditMessage", |hub, user| hub.edit_message(user, room_id, message_id, text))
            .await
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), SimHubError> {
        self.call("DeleteMessage", |hub, user| hub.delete_message(user, message_id)).await
    }

    async fn notify_typing(&self, room_id: &RoomId) -> Result<(), SimHubError> {
        self.call("NotifyTyping", |hub, user| hub.typing(user, room_id, true)).await
    }

    async fn notify_stopped_typing(&self, room_id: &RoomId) -> Result<(), SimHubError> {
        self.call("NotifyStoppedTyping", |hub, user| hub.typing(user, room_id, false)).await
    }

    async fn get_history(&self, room_id: &RoomId) -> Result<Vec<Message>, SimHubError> {
        self.call("GetHistory", |hub, user| hub.get_history(user, room_id)).await
    }

    async fn get_participants(&self, room_id: &RoomId) -> Result<Vec<Participant>, SimHubError> {
        self.call("GetParticipants", |hub, user| hub.get_participants(user, room_id)).await
    }
}

/// Reorder a batch of pushes across rooms while keeping each room's pushes
/// in their original order.
pub fn interleave_by_room<R: Rng + ?Sized>(
    pushes: Vec<PendingPush>,
    rng: &mut R,
) -> Vec<PendingPush> {
    let mut order: Vec<RoomId> = Vec::new();
    let mut lanes: HashMap<RoomId, VecDeque<PendingPush>> = HashMap::new();
    for pending in pushes {
        if !lanes.contains_key(&pending.room_id) {
            order.push(pending.room_id.clone());
        }
        lanes.entry(pending.room_id.clone()).or_default().push_back(pending);
    }

    let mut out = Vec::new();
    while !order.is_empty() {
        let pick = rng.gen_range(0..order.len());
        let lane = lanes.get_mut(&order[pick]);
        match lane.and_then(VecDeque::pop_front) {
            Some(pending) => out.push(pending),
            None => {
                order.swap_remove(pick);
            },
        }
    }
    out
}
