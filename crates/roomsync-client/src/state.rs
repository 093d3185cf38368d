//! Reconciliation state machine.
//!
//! [`SyncState`] owns the five stores plus the bookkeeping that ties them
//! together: tombstones for deleted rooms, the rooms this user explicitly
//! left, and the transport status. It performs no I/O and never reads a
//! clock. The coordinator feeds it acknowledged hub replies and decoded push
//! events together with the current instant, and push handlers report
//! whether anything observable changed.
//!
//! # Room lifecycle
//!
//! ```text
//! Unknown -> Listed -> Joined <-> Active
//!              ^         |
//!              |         v
//!              +------ Left
//! Listed/Left -> Deleted
//! ```
//!
//! Entering `Active` always passes through `Joined`: the membership tracker
//! rejects focusing a room that is not joined.
//!
//! # Fences
//!
//! Listings and resync contents are fetched with no lock held, so commands
//! and pushes keep landing while the fetch is in flight. Every room-level
//! change bumps a generation counter and records it against the room. A
//! [`Fence`] taken before the fetch marks which changes the reply cannot
//! know about: rooms changed after it keep their local state.

use std::{
    collections::{HashMap, HashSet},
    ops::Add,
    time::Duration,
};

use roomsync_core::{
    ConversationStore, MembershipTracker, Message, MessageId, Participant, ParticipantRegistry,
    Provenance, Room, RoomDirectory, RoomId, StoreError, TypingTracker, UserId,
};
use tracing::{debug, info};

use crate::{PushEvent, ReadModel, RoomView};

/// Transport status as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Pushes are flowing.
    Connected,
    /// The transport is down; pushes are being missed.
    Disconnected,
    /// Reconnected and re-fetching joined rooms.
    Resyncing,
    /// Reconnected, but the last resync failed. Local state may be missing
    /// changes until a resync succeeds.
    Stale,
}

/// Position of a room in this client's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Never observed.
    Unknown,
    /// In the directory, not joined.
    Listed,
    /// Joined, not focused.
    Joined,
    /// Joined and focused.
    Active,
    /// Explicitly left.
    Left,
    /// Removed by a room-deleted push.
    Deleted,
}

/// Generation at which a fetch was issued. See [`SyncState::fence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fence(u64);

/// Acknowledged join, with whatever the follow-up lookups returned.
#[derive(Debug, Clone)]
pub struct JoinAck {
    /// Joined room.
    pub room_id: RoomId,
    /// Room fetched because the directory did not list it.
    pub room: Option<Room>,
    /// History returned by the join.
    pub history: Vec<Message>,
    /// Participant set, if the lookup succeeded.
    pub participants: Option<Vec<Participant>>,
}

/// Contents re-fetched for one joined room during resync.
#[derive(Debug, Clone)]
pub struct RoomContents {
    /// Room the contents belong to.
    pub room_id: RoomId,
    /// Full history.
    pub history: Vec<Message>,
    /// Full participant set.
    pub participants: Vec<Participant>,
}

/// Everything fetched by one resync.
#[derive(Debug, Clone, Default)]
pub struct ResyncSnapshot {
    /// Full room listing.
    pub rooms: Vec<Room>,
    /// Contents of every listed room whose participant set includes the
    /// current user.
    pub joined: Vec<RoomContents>,
    /// Rooms held as joined whose participant set no longer includes the
    /// current user.
    pub departed: Vec<RoomId>,
}

/// The client's local view, mutated only by the coordinator.
#[derive(Debug, Clone)]
pub struct SyncState<I> {
    me: Participant,
    typing_ttl: Duration,
    directory: RoomDirectory,
    conversations: ConversationStore,
    participants: ParticipantRegistry,
    typing: TypingTracker<I>,
    membership: MembershipTracker,
    deleted: HashSet<RoomId>,
    left: HashSet<RoomId>,
    connection: ConnectionState,
    generation: u64,
    touched: HashMap<RoomId, u64>,
}

impl<I> SyncState<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Empty state for the given user.
    pub fn new(me: Participant, typing_ttl: Duration) -> Self {
        Self {
            me,
            typing_ttl,
            directory: RoomDirectory::new(),
            conversations: ConversationStore::new(),
            participants: ParticipantRegistry::new(),
            typing: TypingTracker::new(),
            membership: MembershipTracker::new(),
            deleted: HashSet::new(),
            left: HashSet::new(),
            connection: ConnectionState::Connected,
            generation: 0,
            touched: HashMap::new(),
        }
    }

    /// The current user.
    pub fn me(&self) -> &Participant {
        &self.me
    }

    /// Room directory.
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Message logs.
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Participant sets.
    pub fn participants(&self) -> &ParticipantRegistry {
        &self.participants
    }

    /// Typing entries.
    pub fn typing(&self) -> &TypingTracker<I> {
        &self.typing
    }

    /// Joined rooms and focus.
    pub fn membership(&self) -> &MembershipTracker {
        &self.membership
    }

    /// Transport status.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Mark the current generation. Take it before issuing a fetch whose
    /// reply goes to [`Self::apply_listing`] or [`Self::apply_resync`].
    pub fn fence(&self) -> Fence {
        Fence(self.generation)
    }

    /// Whether the room changed after `fence` was taken.
    pub fn changed_since(&self, room_id: &RoomId, fence: Fence) -> bool {
        self.touched.get(room_id).is_some_and(|&at| at > fence.0)
    }

    /// Lifecycle position of a room.
    pub fn phase(&self, room_id: &RoomId) -> RoomPhase {
        if self.deleted.contains(room_id) {
            RoomPhase::Deleted
        } else if self.membership.active_room_id() == Some(room_id) {
            RoomPhase::Active
        } else if self.membership.is_joined(room_id) {
            RoomPhase::Joined
        } else if self.left.contains(room_id) {
            RoomPhase::Left
        } else if self.directory.contains(room_id) {
            RoomPhase::Listed
        } else {
            RoomPhase::Unknown
        }
    }

    /// Record a transport status change.
    pub fn set_connection(&mut self, connection: ConnectionState) -> bool {
        let changed = self.connection != connection;
        self.connection = connection;
        changed
    }

    /// Focus a joined room, or clear focus.
    pub fn set_active(&mut self, room_id: Option<&RoomId>) -> Result<(), StoreError> {
        self.membership.set_active(room_id)
    }

    /// Replace the directory with a listing fetched after `fence`.
    ///
    /// Rooms changed since the fence keep their local copy, membership and
    /// tombstone; the listing cannot know about them. Older tombstones are
    /// cleared. Joined rooms missing from the listing were deleted while
    /// nobody was watching: they are dropped and tombstoned.
    pub fn apply_listing(&mut self, rooms: Vec<Room>, fence: Fence) {
        let touched = &self.touched;
        let newer = |room_id: &RoomId| touched.get(room_id).is_some_and(|&at| at > fence.0);

        let kept: Vec<Room> =
            self.directory.iter().filter(|room| newer(&room.id)).cloned().collect();
        self.deleted.retain(newer);
        let rooms: Vec<Room> =
            rooms.into_iter().filter(|room| !self.deleted.contains(&room.id)).collect();
        self.directory.replace_all(rooms);
        for room in kept {
            self.directory.upsert(room, Provenance::Incidental);
        }

        let vanished: Vec<RoomId> = self
            .membership
            .joined()
            .filter(|room_id| !self.directory.contains(room_id))
            .cloned()
            .collect();
        for room_id in vanished {
            info!(%room_id, "joined room missing from listing");
            self.forget_room(&room_id);
            self.deleted.insert(room_id.clone());
            self.touch(&room_id, true);
        }
    }

    /// Apply an acknowledged room creation. The creator is joined and the
    /// room becomes active.
    ///
    /// A `room-deleted` push may overtake the acknowledgement, in which case
    /// the room stays deleted.
    pub fn apply_created_room(&mut self, room: Room) -> bool {
        let room_id = room.id.clone();
        if self.deleted.contains(&room_id) {
            debug!(%room_id, "created room already deleted");
            return false;
        }
        self.left.remove(&room_id);
        self.directory.upsert(room, Provenance::Target);
        self.enter(&room_id);
        if self.membership.set_active(Some(&room_id)).is_ok() {
            info!(%room_id, "created room is active");
        }
        self.touch(&room_id, true)
    }

    /// Apply an acknowledged join.
    ///
    /// With `activate`, the room is focused if nothing else is. Returns
    /// `false` when a `room-deleted` push overtook the acknowledgement.
    pub fn apply_joined(&mut self, ack: JoinAck, activate: bool) -> bool {
        let JoinAck { room_id, room, history, participants } = ack;
        if self.deleted.contains(&room_id) {
            debug!(%room_id, "joined room already deleted");
            return false;
        }
        self.left.remove(&room_id);

        match room {
            Some(room) => {
                self.directory.upsert(room, Provenance::Target);
            },
            None if !self.directory.contains(&room_id) => {
                self.directory.upsert(Room::placeholder(room_id.clone()), Provenance::Incidental);
            },
            None => {},
        }

        self.conversations.merge_history(&room_id, history);
        if let Some(participants) = participants {
            self.participants.replace(&room_id, participants);
        }
        self.enter(&room_id);

        if activate
            && self.membership.active_room_id().is_none()
            && self.membership.set_active(Some(&room_id)).is_ok()
        {
            info!(%room_id, "joined room is active");
        }
        self.touch(&room_id, true)
    }

    /// Apply an acknowledged leave.
    pub fn apply_left(&mut self, room_id: &RoomId) {
        self.left.insert(room_id.clone());
        if self.forget_room(room_id) {
            info!(%room_id, "left room");
        }
        self.touch(room_id, true);
    }

    /// Merge a message, from a send acknowledgement or a push.
    ///
    /// Messages for rooms that are not joined are dropped. A message from a
    /// user ends their typing entry.
    pub fn apply_message(&mut self, message: Message, now: I) -> bool {
        let room_id = message.room_id.clone();
        if !self.membership.is_joined(&room_id) {
            debug!(%room_id, message_id = %message.id, "message for unjoined room dropped");
            return false;
        }
        let author = message.author_id.clone();
        let appended = self.conversations.append(&room_id, message);
        let cleared = self.typing.clear_typing(&room_id, &author, now);
        self.touch(&room_id, appended) || cleared
    }

    /// Merge an edited copy of a message, from an edit acknowledgement or a
    /// push. Both carry the hub's stamp, so whichever is newer wins.
    pub fn apply_edit(&mut self, message: &Message) -> bool {
        let edited = self.conversations.edit_in_place(
            &message.room_id,
            &message.id,
            &message.content,
            message.updated_at,
        );
        self.touch(&message.room_id, edited)
    }

    /// Remove a message, from a delete acknowledgement or a push.
    pub fn apply_delete(&mut self, room_id: &RoomId, message_id: &MessageId) -> bool {
        let removed = self.conversations.remove(room_id, message_id).is_some();
        self.touch(room_id, removed)
    }

    /// Merge a `room-created` push.
    ///
    /// Tombstoned rooms stay deleted. A room listing the current user implies
    /// membership unless the user explicitly left it.
    pub fn apply_room_created(&mut self, room: Room) -> bool {
        let room_id = room.id.clone();
        if self.deleted.contains(&room_id) {
            debug!(%room_id, "room-created for deleted room ignored");
            return false;
        }
        let implies_membership =
            room.lists_participant(&self.me.user_id) && !self.left.contains(&room_id);

        let mut changed = self.directory.upsert(room, Provenance::Target);
        if implies_membership {
            changed |= self.enter(&room_id);
        }
        self.touch(&room_id, changed)
    }

    /// Merge a `room-deleted` push.
    pub fn apply_room_deleted(&mut self, room_id: &RoomId) -> bool {
        let listed = self.directory.remove(room_id).is_some();
        let forgotten = self.forget_room(room_id);
        self.left.remove(room_id);
        let tombstoned = self.deleted.insert(room_id.clone());
        if listed || forgotten {
            info!(%room_id, "room deleted");
        }
        self.touch(room_id, listed || forgotten || tombstoned)
    }

    /// Merge a `participant-joined` push.
    ///
    /// The current user joining implies membership, even for a room the
    /// directory has not listed yet.
    pub fn apply_participant_joined(&mut self, room_id: &RoomId, participant: Participant) -> bool {
        if self.deleted.contains(room_id) {
            return false;
        }

        let mut changed = false;
        if participant.user_id == self.me.user_id {
            self.left.remove(room_id);
            if !self.directory.contains(room_id) {
                changed |= self
                    .directory
                    .upsert(Room::placeholder(room_id.clone()), Provenance::Incidental);
            }
            if self.membership.join(room_id) {
                info!(%room_id, "membership implied by push");
                changed = true;
            }
        } else if !self.membership.is_joined(room_id) {
            let user_id = &participant.user_id;
            debug!(%room_id, %user_id, "participant for unjoined room dropped");
            return false;
        }

        changed |= self.participants.add(room_id, participant);
        self.touch(room_id, changed)
    }

    /// Merge a `participant-left` push.
    pub fn apply_participant_left(&mut self, room_id: &RoomId, user_id: &UserId, now: I) -> bool {
        if *user_id == self.me.user_id {
            if !self.membership.is_joined(room_id) {
                return false;
            }
            self.left.insert(room_id.clone());
            info!(%room_id, "membership ended by push");
            let forgotten = self.forget_room(room_id);
            return self.touch(room_id, forgotten);
        }

        let removed = self.participants.remove(room_id, user_id);
        let cleared = self.typing.clear_typing(room_id, user_id, now);
        self.touch(room_id, removed) || cleared
    }

    /// Merge a `typing-started` push. The current user's own typing is never
    /// tracked.
    pub fn apply_typing_started(&mut self, room_id: &RoomId, user_id: &UserId, now: I) -> bool {
        if *user_id == self.me.user_id || !self.membership.is_joined(room_id) {
            return false;
        }
        self.typing.mark_typing(room_id, user_id, self.typing_ttl, now);
        true
    }

    /// Merge a `typing-stopped` push.
    pub fn apply_typing_stopped(&mut self, room_id: &RoomId, user_id: &UserId, now: I) -> bool {
        if *user_id == self.me.user_id {
            return false;
        }
        self.typing.clear_typing(room_id, user_id, now)
    }

    /// Route a decoded push to its merge handler.
    pub fn apply_push(&mut self, event: PushEvent, now: I) -> bool {
        match event {
            PushEvent::RoomCreated(room) => self.apply_room_created(room),
            PushEvent::RoomDeleted { room_id } => self.apply_room_deleted(&room_id),
            PushEvent::MessageCreated(message) => self.apply_message(message, now),
            PushEvent::MessageEdited(message) => self.apply_edit(&message),
            PushEvent::MessageDeleted { room_id, message_id } => {
                self.apply_delete(&room_id, &message_id)
            },
            PushEvent::ParticipantJoined { room_id, participant } => {
                self.apply_participant_joined(&room_id, participant)
            },
            PushEvent::ParticipantLeft { room_id, user_id } => {
                self.apply_participant_left(&room_id, &user_id, now)
            },
            PushEvent::TypingStarted { room_id, user_id } => {
                self.apply_typing_started(&room_id, &user_id, now)
            },
            PushEvent::TypingStopped { room_id, user_id } => {
                self.apply_typing_stopped(&room_id, &user_id, now)
            },
        }
    }

    /// Apply a resync whose fetch began at `fence`.
    ///
    /// The listing replaces the directory, and the histories and participant
    /// sets of joined rooms are replaced, not merged. Membership follows the
    /// fetched participant sets, which covers membership echoes missed while
    /// disconnected. Rooms changed after the fence are not re-joined or
    /// dropped; their fetched history is merged ahead of what is held.
    pub fn apply_resync(&mut self, snapshot: ResyncSnapshot, fence: Fence) {
        let ResyncSnapshot { rooms, joined, departed } = snapshot;
        self.apply_listing(rooms, fence);

        for room_id in departed {
            if self.changed_since(&room_id, fence) {
                debug!(%room_id, "membership changed during resync, departure skipped");
            } else if self.forget_room(&room_id) {
                info!(%room_id, "membership ended while disconnected");
                self.left.insert(room_id.clone());
                self.touch(&room_id, true);
            }
        }

        for RoomContents { room_id, history, participants } in joined {
            if self.deleted.contains(&room_id) {
                continue;
            }
            if self.changed_since(&room_id, fence) {
                if self.membership.is_joined(&room_id) {
                    self.conversations.merge_history(&room_id, history);
                } else {
                    debug!(%room_id, "left during resync, contents skipped");
                }
                continue;
            }
            self.left.remove(&room_id);
            if self.membership.join(&room_id) {
                info!(%room_id, "membership restored by resync");
            }
            self.conversations.replace(&room_id, history);
            self.participants.replace(&room_id, participants);
            self.touch(&room_id, true);
        }
        self.connection = ConnectionState::Connected;
    }

    /// Physically remove elapsed typing entries.
    pub fn sweep(&mut self, now: I) -> bool {
        let removed = self.typing.sweep(now);
        if !removed.is_empty() {
            debug!(count = removed.len(), "typing entries expired");
        }
        !removed.is_empty()
    }

    /// Full view of one room, if listed.
    pub fn room_view(&self, room_id: &RoomId, now: I) -> Option<RoomView<I>> {
        let room = self.directory.get(room_id)?.clone();
        let typing = self
            .typing
            .entries(room_id, now)
            .into_iter()
            .filter(|(user, _)| *user != self.me.user_id)
            .collect();

        Some(RoomView {
            room,
            history: self.conversations.history(room_id).to_vec(),
            participants: self.participants.participants_of(room_id),
            typing,
        })
    }

    /// Compose the published read model in one pass.
    pub fn read_model(&self, version: u64, now: I) -> ReadModel<I> {
        ReadModel {
            version,
            connection: self.connection,
            rooms: self.directory.list_all(),
            joined: self.membership.joined().cloned().collect(),
            active: self.membership.active_room_id().and_then(|id| self.room_view(id, now)),
        }
    }

    fn enter(&mut self, room_id: &RoomId) -> bool {
        let joined = self.membership.join(room_id);
        let added = self.participants.add(room_id, self.me.clone());
        if joined {
            info!(%room_id, "joined room");
        }
        joined || added
    }

    /// Record a change to a room. Returns `changed`.
    fn touch(&mut self, room_id: &RoomId, changed: bool) -> bool {
        if changed {
            self.generation += 1;
            self.touched.insert(room_id.clone(), self.generation);
        }
        changed
    }

    fn forget_room(&mut self, room_id: &RoomId) -> bool {
        let left = self.membership.leave(room_id);
        let history = self.conversations.drop_room(room_id);
        let participants = self.participants.drop_room(room_id);
        let typing = self.typing.drop_room(room_id);
        left || history || participants || typing
    }
}
