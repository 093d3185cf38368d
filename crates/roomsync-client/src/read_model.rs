//! Read-only views published to consumers.
//!
//! A [`ReadModel`] is composed in one pass under the coordinator's state lock,
//! so a consumer never sees a history from one logical update next to a
//! participant set from another.

use roomsync_core::{Message, Participant, Room, RoomId, UserId};

use crate::ConnectionState;

/// Consistent snapshot of everything a UI layer renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadModel<I> {
    /// Increases by one with every published change.
    pub version: u64,
    /// Transport status as last reported.
    pub connection: ConnectionState,
    /// Room directory in listing order.
    pub rooms: Vec<Room>,
    /// Joined rooms in identifier order.
    pub joined: Vec<RoomId>,
    /// Full view of the focused room.
    pub active: Option<RoomView<I>>,
}

impl<I> ReadModel<I> {
    /// Model with nothing loaded, published before the first change.
    pub fn empty() -> Self {
        Self {
            version: 0,
            connection: ConnectionState::Connected,
            rooms: Vec::new(),
            joined: Vec::new(),
            active: None,
        }
    }

    /// Identifier of the focused room.
    pub fn active_room_id(&self) -> Option<&RoomId> {
        self.active.as_ref().map(|view| &view.room.id)
    }

    /// Whether the room is joined.
    pub fn is_joined(&self, room_id: &RoomId) -> bool {
        self.joined.contains(room_id)
    }
}

impl<I> Default for ReadModel<I> {
    fn default() -> Self {
        Self::empty()
    }
}

/// One room with its history, participants and typing entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomView<I> {
    /// Directory entry.
    pub room: Room,
    /// Messages in first-observed order.
    pub history: Vec<Message>,
    /// Participants ordered by user identifier.
    pub participants: Vec<Participant>,
    /// Other users' typing entries with their expiry instants.
    pub typing: Vec<(UserId, I)>,
}

impl<I: Copy + Ord> RoomView<I> {
    /// Users still typing at `now`.
    ///
    /// A published view can outlive the instant it was built at; filtering
    /// here keeps an entry from being shown past its expiry.
    pub fn typists_at(&self, now: I) -> Vec<&UserId> {
        self.typing.iter().filter(|&&(_, expiry)| expiry > now).map(|(user, _)| user).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typists_filtered_by_expiry() {
        let view = RoomView {
            room: Room::new("r1", "general", 1),
            history: Vec::new(),
            participants: Vec::new(),
            typing: vec![(UserId::from("u1"), 10u64), (UserId::from("u2"), 20)],
        };

        assert_eq!(view.typists_at(5), [&UserId::from("u1"), &UserId::from("u2")]);
        assert_eq!(view.typists_at(10), [&UserId::from("u2")]);
        assert!(view.typists_at(20).is_empty());
    }

    #[test]
    fn empty_model_has_no_focus() {
        let model = ReadModel::<u64>::empty();
        assert_eq!(model.version, 0);
        assert_eq!(model.active_room_id(), None);
    }
}
