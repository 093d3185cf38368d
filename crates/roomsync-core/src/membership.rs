//! Rooms the current user has joined, and which one is focused.
//!
//! The active room is always `None` or a member of the joined set. Every
//! mutator preserves this: `set_active` rejects non-members, and leaving the
//! active room reassigns focus to a remaining joined room (the first in
//! identifier order) or clears it.

use std::collections::BTreeSet;

use crate::{RoomId, StoreError};

/// Joined set plus the active room.
#[derive(Debug, Clone, Default)]
pub struct MembershipTracker {
    joined: BTreeSet<RoomId>,
    active: Option<RoomId>,
}

impl MembershipTracker {
    /// Create a tracker with no memberships.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a membership. Returns `false` if already joined.
    pub fn join(&mut self, room_id: &RoomId) -> bool {
        self.joined.insert(room_id.clone())
    }

    /// Drop a membership. Returns `false` if not joined.
    ///
    /// Leaving the active room moves focus to another joined room, if any.
    pub fn leave(&mut self, room_id: &RoomId) -> bool {
        if !self.joined.remove(room_id) {
            return false;
        }
        if self.active.as_ref() == Some(room_id) {
            self.active = self.joined.first().cloned();
            tracing::debug!(left = %room_id, active = ?self.active, "active room reassigned");
        }
        true
    }

    /// Focus a joined room, or clear focus with `None`.
    pub fn set_active(&mut self, room_id: Option<&RoomId>) -> Result<(), StoreError> {
        match room_id {
            None => {
                self.active = None;
                Ok(())
            },
            Some(id) if self.joined.contains(id) => {
                self.active = Some(id.clone());
                Ok(())
            },
            Some(id) => Err(StoreError::InvalidOperation {
                operation: "set active room",
                reason: format!("room {id} is not joined"),
            }),
        }
    }

    /// Whether the room is joined.
    pub fn is_joined(&self, room_id: &RoomId) -> bool {
        self.joined.contains(room_id)
    }

    /// Currently focused room.
    pub fn active_room_id(&self) -> Option<&RoomId> {
        self.active.as_ref()
    }

    /// Joined rooms in identifier order.
    pub fn joined(&self) -> impl Iterator<Item = &RoomId> + '_ {
        self.joined.iter()
    }

    /// Number of joined rooms.
    pub fn joined_count(&self) -> usize {
        self.joined.len()
    }
}
