//! Every room known to exist on the server, joined or not.

use std::collections::HashMap;

use crate::{Room, RoomId};

/// How a room copy reached the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// The room was the subject of the operation (create, get, listing).
    Target,
    /// A denormalized copy carried along by something else.
    Incidental,
}

#[derive(Debug, Clone)]
struct Entry {
    room: Room,
    provenance: Provenance,
}

/// Directory of all known rooms, in first-observed order.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    entries: HashMap<RoomId, Entry>,
    order: Vec<RoomId>,
}

impl RoomDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// All rooms in listing order.
    pub fn list_all(&self) -> Vec<Room> {
        self.iter().cloned().collect()
    }

    /// Iterate rooms in listing order without cloning.
    pub fn iter(&self) -> impl Iterator<Item = &Room> + '_ {
        self.order.iter().filter_map(|id| self.entries.get(id).map(|e| &e.room))
    }

    /// Room by identifier.
    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.entries.get(room_id).map(|e| &e.room)
    }

    /// Whether the room is listed.
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.entries.contains_key(room_id)
    }

    /// Number of listed rooms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Directory holds no rooms.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or update a room. Returns `true` if the stored copy changed.
    ///
    /// A copy with an older `updated_at` than the stored one is ignored. At
    /// equal `updated_at`, an incidental copy never replaces a target copy.
    pub fn upsert(&mut self, room: Room, provenance: Provenance) -> bool {
        match self.entries.get_mut(&room.id) {
            None => {
                self.order.push(room.id.clone());
                self.entries.insert(room.id.clone(), Entry { room, provenance });
                true
            },
            Some(entry) => {
                let stored = &entry.room;
                let newer = room.updated_at > stored.updated_at;
                let same_age = room.updated_at == stored.updated_at;
                let outranked =
                    entry.provenance == Provenance::Target && provenance == Provenance::Incidental;

                if !(newer || (same_age && !outranked)) {
                    tracing::debug!(room_id = %room.id, "ignoring stale room copy");
                    return false;
                }

                let changed = *stored != room;
                entry.room = room;
                if provenance == Provenance::Target || newer {
                    entry.provenance = provenance;
                }
                changed
            },
        }
    }

    /// Remove a room. Returns the removed room, if it was listed.
    pub fn remove(&mut self, room_id: &RoomId) -> Option<Room> {
        let entry = self.entries.remove(room_id)?;
        self.order.retain(|id| id != room_id);
        Some(entry.room)
    }

    /// Replace the whole directory with an authoritative listing.
    ///
    /// Listing order becomes the server's order. Duplicate identifiers in the
    /// listing keep their first position and their newest copy.
    pub fn replace_all(&mut self, rooms: Vec<Room>) {
        self.entries.clear();
        self.order.clear();
        for room in rooms {
            self.upsert(room, Provenance::Target);
        }
    }
}
