//! Per-room participant sets.
//!
//! Presence in a room's set is the only source of truth for "this user is in
//! the room". Adds and removes are idempotent so a join acknowledgement and
//! the matching push echo may arrive in either order.

use std::collections::{BTreeMap, HashMap};

use crate::{Participant, RoomId, UserId};

/// Participant sets keyed by room, then by user.
#[derive(Debug, Clone, Default)]
pub struct ParticipantRegistry {
    rooms: HashMap<RoomId, BTreeMap<UserId, Participant>>,
}

impl ParticipantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant. Returns `false` if the user was already present
    /// with identical display fields.
    ///
    /// A repeated add with different display fields refreshes them in place;
    /// the user still appears once.
    pub fn add(&mut self, room_id: &RoomId, participant: Participant) -> bool {
        let set = self.rooms.entry(room_id.clone()).or_default();
        match set.get(&participant.user_id) {
            Some(existing) if *existing == participant => false,
            _ => {
                set.insert(participant.user_id.clone(), participant);
                true
            },
        }
    }

    /// Remove a participant. Returns `false` if the user was not present.
    pub fn remove(&mut self, room_id: &RoomId, user_id: &UserId) -> bool {
        let Some(set) = self.rooms.get_mut(room_id) else {
            return false;
        };
        set.remove(user_id).is_some()
    }

    /// Participants of a room, ordered by user identifier.
    pub fn participants_of(&self, room_id: &RoomId) -> Vec<Participant> {
        self.rooms.get(room_id).map(|set| set.values().cloned().collect()).unwrap_or_default()
    }

    /// Whether the user is present in the room.
    pub fn contains(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        self.rooms.get(room_id).is_some_and(|set| set.contains_key(user_id))
    }

    /// Number of participants in a room.
    pub fn count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, BTreeMap::len)
    }

    /// Replace a room's set wholesale with an authoritative listing.
    pub fn replace(&mut self, room_id: &RoomId, participants: Vec<Participant>) {
        let set = participants.into_iter().map(|p| (p.user_id.clone(), p)).collect();
        self.rooms.insert(room_id.clone(), set);
    }

    /// Drop everything held for a room.
    pub fn drop_room(&mut self, room_id: &RoomId) -> bool {
        self.rooms.remove(room_id).is_some()
    }
}
