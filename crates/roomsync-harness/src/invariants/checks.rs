//! Standard invariant checks.
//!
//! Each check states a property of a single client's stores that must hold
//! after every command and every push, however they interleave.

use std::collections::HashSet;

use super::{ClientSnapshot, Invariant, RoomSnapshot};

/// The focused room must be joined.
pub struct ActiveRoomInJoined;

impl Invariant for ActiveRoomInJoined {
    fn name(&self) -> &'static str {
        "active_room_in_joined"
    }

    fn check(&self, client: &ClientSnapshot) -> Result<(), String> {
        match &client.active_room {
            Some(active) if !client.joined.contains(active) => {
                Err(format!("active room {active} not in joined {:?}", client.joined))
            },
            _ => Ok(()),
        }
    }
}

/// Every joined room must be listed in the directory.
pub struct JoinedRoomsListed;

impl Invariant for JoinedRoomsListed {
    fn name(&self) -> &'static str {
        "joined_rooms_listed"
    }

    fn check(&self, client: &ClientSnapshot) -> Result<(), String> {
        match client.joined.iter().find(|id| !client.rooms.contains_key(*id)) {
            Some(missing) => Err(format!("joined room {missing} not listed")),
            None => Ok(()),
        }
    }
}

/// A room's history holds each message identifier at most once.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, client: &ClientSnapshot) -> Result<(), String> {
        for (room_id, room) in &client.rooms {
            let mut seen = HashSet::new();
            if let Some((dup, _)) = room.messages.iter().find(|(id, _)| !seen.insert(id)) {
                return Err(format!("room {room_id} holds message {dup} twice"));
            }
        }
        Ok(())
    }
}

/// Messages are only held under the room they belong to.
pub struct MessagesBelongToRoom;

impl Invariant for MessagesBelongToRoom {
    fn name(&self) -> &'static str {
        "messages_belong_to_room"
    }

    fn check(&self, client: &ClientSnapshot) -> Result<(), String> {
        client.rooms.iter().try_for_each(|(room_id, room)| {
            match room.messages.iter().find(|(_, owner)| owner != room_id) {
                Some((id, owner)) => Err(format!("room {room_id} holds {id} of {owner}")),
                None => Ok(()),
            }
        })
    }
}

/// Only joined rooms hold history, participants or typists.
pub struct ContentOnlyForJoinedRooms;

impl Invariant for ContentOnlyForJoinedRooms {
    fn name(&self) -> &'static str {
        "content_only_for_joined_rooms"
    }

    fn check(&self, client: &ClientSnapshot) -> Result<(), String> {
        let holds_content = |room: &RoomSnapshot| {
            !room.messages.is_empty() || !room.participants.is_empty() || !room.typists.is_empty()
        };
        let stray = client
            .rooms
            .iter()
            .find(|(id, room)| !client.joined.contains(*id) && holds_content(room));
        match stray {
            Some((room_id, room)) => Err(format!(
                "unjoined room {room_id} holds {} messages, {} participants",
                room.messages.len(),
                room.participants.len()
            )),
            None => Ok(()),
        }
    }
}

/// A client is a participant of every room it has joined.
pub struct SelfInJoinedRooms;

impl Invariant for SelfInJoinedRooms {
    fn name(&self) -> &'static str {
        "self_in_joined_rooms"
    }

    fn check(&self, client: &ClientSnapshot) -> Result<(), String> {
        let unlisted = client.joined.iter().find(|room_id| {
            !client.rooms.get(*room_id).is_some_and(|room| room.participants.contains(&client.user))
        });
        match unlisted {
            Some(room_id) => Err(format!("joined room {room_id} does not list them")),
            None => Ok(()),
        }
    }
}

/// A client never shows its own user as typing.
pub struct SelfNotTyping;

impl Invariant for SelfNotTyping {
    fn name(&self) -> &'static str {
        "self_not_typing"
    }

    fn check(&self, client: &ClientSnapshot) -> Result<(), String> {
        match client.rooms.iter().find(|(_, room)| room.typists.contains(&client.user)) {
            Some((room_id, _)) => Err(format!("shown typing in room {room_id}")),
            None => Ok(()),
        }
    }
}
