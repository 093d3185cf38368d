//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a client's stores hold at one instant. Invariants
//! operate on snapshots rather than live state so every check sees the same
//! consistent picture.

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Add,
    time::Duration,
};

use roomsync_client::SyncState;
use roomsync_core::{MessageId, RoomId, UserId};

/// Snapshot of every simulated client.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Snapshot with no clients.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot with one client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Snapshot from several clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }
}

/// One client's observable state.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// The client's user.
    pub user: UserId,
    /// Focused room.
    pub active_room: Option<RoomId>,
    /// Rooms held as joined.
    pub joined: BTreeSet<RoomId>,
    /// Every listed room.
    pub rooms: BTreeMap<RoomId, RoomSnapshot>,
}

impl ClientSnapshot {
    /// Empty snapshot for a user.
    pub fn new(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            active_room: None,
            joined: BTreeSet::new(),
            rooms: BTreeMap::new(),
        }
    }

    /// Capture a client's state at `now`.
    pub fn from_state<I>(state: &SyncState<I>, now: I) -> Self
    where
        I: Copy + Ord + Add<Duration, Output = I>,
    {
        let rooms = state
            .directory()
            .iter()
            .map(|room| {
                let history = state.conversations().history(&room.id);
                let snapshot = RoomSnapshot {
                    messages: history.iter().map(|m| (m.id.clone(), m.room_id.clone())).collect(),
                    participants: state
                        .participants()
                        .participants_of(&room.id)
                        .into_iter()
                        .map(|p| p.user_id)
                        .collect(),
                    typists: state.typing().active_typists(&room.id, now).into_iter().collect(),
                };
                (room.id.clone(), snapshot)
            })
            .collect();

        Self {
            user: state.me().user_id.clone(),
            active_room: state.membership().active_room_id().cloned(),
            joined: state.membership().joined().cloned().collect(),
            rooms,
        }
    }

    /// Set the focused room.
    pub fn with_active_room(mut self, room_id: Option<RoomId>) -> Self {
        self.active_room = room_id;
        self
    }

    /// Mark a room joined.
    pub fn with_joined(mut self, room_id: impl Into<RoomId>) -> Self {
        self.joined.insert(room_id.into());
        self
    }

    /// List a room.
    pub fn with_room(mut self, room_id: impl Into<RoomId>, room: RoomSnapshot) -> Self {
        self.rooms.insert(room_id.into(), room);
        self
    }
}

/// One listed room as a client sees it.
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    /// Held history as (message, owning room) pairs, in order.
    pub messages: Vec<(MessageId, RoomId)>,
    /// Participant identifiers.
    pub participants: BTreeSet<UserId>,
    /// Users typing at snapshot time.
    pub typists: BTreeSet<UserId>,
}

impl RoomSnapshot {
    /// Add a message owned by `room_id`.
    pub fn with_message(mut self, id: impl Into<MessageId>, room_id: impl Into<RoomId>) -> Self {
        self.messages.push((id.into(), room_id.into()));
        self
    }

    /// Add participants.
    pub fn with_participants<U>(mut self, users: impl IntoIterator<Item = U>) -> Self
    where
        U: Into<UserId>,
    {
        self.participants.extend(users.into_iter().map(Into::into));
        self
    }

    /// Add typists.
    pub fn with_typists<U: Into<UserId>>(mut self, users: impl IntoIterator<Item = U>) -> Self {
        self.typists.extend(users.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use roomsync_client::JoinAck;
    use roomsync_core::Participant;

    use super::*;
    use crate::SimInstant;

    #[test]
    fn empty_snapshot() {
        assert!(SystemSnapshot::empty().clients.is_empty());
    }

    #[test]
    fn captures_joined_room() {
        let mut state: SyncState<SimInstant> =
            SyncState::new(Participant::new("ada", "Ada"), Duration::from_secs(5));
        state.apply_joined(
            JoinAck {
                room_id: "r1".into(),
                room: None,
                history: Vec::new(),
                participants: Some(vec![Participant::new("bo", "Bo")]),
            },
            true,
        );

        let client = ClientSnapshot::from_state(&state, SimInstant::default());
        assert_eq!(client.user, UserId::from("ada"));
        assert_eq!(client.active_room, Some(RoomId::from("r1")));
        assert!(client.joined.contains("r1"));
        let room = &client.rooms[&RoomId::from("r1")];
        assert_eq!(room.participants, BTreeSet::from([UserId::from("ada"), UserId::from("bo")]));
    }
}
