//! Typing indicators with expiry.
//!
//! Each (room, user) pair holds at most one entry carrying its expiry
//! instant. An entry whose expiry has elapsed is reported absent even before
//! [`TypingTracker::sweep`] physically removes it. Time is always passed in
//! by the caller, so the tracker works with real and virtual clocks alike.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Add,
    time::Duration,
};

use crate::{RoomId, UserId};

/// Live typing entries per room.
#[derive(Debug, Clone)]
pub struct TypingTracker<I> {
    rooms: HashMap<RoomId, BTreeMap<UserId, I>>,
}

impl<I> Default for TypingTracker<I> {
    fn default() -> Self {
        Self { rooms: HashMap::new() }
    }
}

impl<I> TypingTracker<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user as typing until `now + ttl`.
    ///
    /// A live entry has its expiry reset rather than stacked.
    pub fn mark_typing(&mut self, room_id: &RoomId, user_id: &UserId, ttl: Duration, now: I) {
        self.rooms.entry(room_id.clone()).or_default().insert(user_id.clone(), now + ttl);
    }

    /// Clear a user's entry. Returns `true` if a live entry was cleared.
    pub fn clear_typing(&mut self, room_id: &RoomId, user_id: &UserId, now: I) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let removed = room.remove(user_id);
        if room.is_empty() {
            self.rooms.remove(room_id);
        }
        removed.is_some_and(|expiry| expiry > now)
    }

    /// Users typing in a room at `now`, ordered by user identifier.
    pub fn active_typists(&self, room_id: &RoomId, now: I) -> Vec<UserId> {
        self.entries(room_id, now).into_iter().map(|(user, _)| user).collect()
    }

    /// Live entries of a room with their expiries.
    pub fn entries(&self, room_id: &RoomId, now: I) -> Vec<(UserId, I)> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.iter()
                    .filter(|&(_, &expiry)| expiry > now)
                    .map(|(user, &expiry)| (user.clone(), expiry))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the user has a live entry in the room.
    pub fn is_typing(&self, room_id: &RoomId, user_id: &UserId, now: I) -> bool {
        self.rooms
            .get(room_id)
            .and_then(|room| room.get(user_id))
            .is_some_and(|&expiry| expiry > now)
    }

    /// Physically remove elapsed entries. Returns the removed pairs.
    pub fn sweep(&mut self, now: I) -> Vec<(RoomId, UserId)> {
        let mut removed = Vec::new();
        for (room_id, room) in &mut self.rooms {
            room.retain(|user, &mut expiry| {
                let live = expiry > now;
                if !live {
                    removed.push((room_id.clone(), user.clone()));
                }
                live
            });
        }
        self.rooms.retain(|_, room| !room.is_empty());
        removed
    }

    /// Earliest pending expiry across all rooms, if any.
    pub fn next_expiry(&self) -> Option<I> {
        self.rooms.values().flat_map(BTreeMap::values).copied().min()
    }

    /// Drop every entry for a room.
    pub fn drop_room(&mut self, room_id: &RoomId) -> bool {
        self.rooms.remove(room_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    fn at(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn entry_expires_without_sweep() {
        let mut tracker = TypingTracker::new();
        let room = RoomId::from("r1");
        let user = UserId::from("u1");
        tracker.mark_typing(&room, &user, TTL, at(0));

        assert_eq!(tracker.active_typists(&room, at(4)), [user.clone()]);
        assert!(tracker.active_typists(&room, at(5)).is_empty());
        assert!(!tracker.is_typing(&room, &user, at(6)));
    }

    #[test]
    fn refresh_resets_expiry() {
        let mut tracker = TypingTracker::new();
        let room = RoomId::from("r1");
        let user = UserId::from("u1");
        tracker.mark_typing(&room, &user, TTL, at(0));
        tracker.mark_typing(&room, &user, TTL, at(3));

        assert!(tracker.is_typing(&room, &user, at(7)));
        assert_eq!(tracker.entries(&room, at(7)), [(user, at(8))]);
    }

    #[test]
    fn clear_removes_entry() {
        let mut tracker = TypingTracker::new();
        let room = RoomId::from("r1");
        let user = UserId::from("u1");
        tracker.mark_typing(&room, &user, TTL, at(0));

        assert!(tracker.clear_typing(&room, &user, at(1)));
        assert!(!tracker.clear_typing(&room, &user, at(1)));
        assert!(tracker.active_typists(&room, at(1)).is_empty());
    }

    #[test]
    fn sweep_removes_only_elapsed() {
        let mut tracker = TypingTracker::new();
        let room = RoomId::from("r1");
        tracker.mark_typing(&room, &"old".into(), TTL, at(0));
        tracker.mark_typing(&room, &"new".into(), TTL, at(4));

        assert_eq!(tracker.next_expiry(), Some(at(5)));
        let removed = tracker.sweep(at(6));
        assert_eq!(removed, [(room.clone(), UserId::from("old"))]);
        assert_eq!(tracker.active_typists(&room, at(6)), [UserId::from("new")]);
        assert_eq!(tracker.next_expiry(), Some(at(9)));
    }
}
