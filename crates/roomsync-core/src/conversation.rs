//! Per-room message logs.
//!
//! Logs are kept in first-observed order. A message that is acknowledged
//! after a later message was already merged is appended at its observed
//! position and never moved. Appends are idempotent on message identifier,
//! and edits or removals of unknown identifiers are no-ops, so racing
//! delete/edit pairs and request/push echoes converge without bookkeeping.

use std::collections::{HashMap, HashSet};

use crate::{Message, MessageId, RoomId, Timestamp};

/// One room's ordered log with an identifier index.
#[derive(Debug, Clone, Default)]
struct RoomLog {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

impl RoomLog {
    fn from_messages(messages: Vec<Message>) -> Self {
        let mut log = Self::default();
        for message in messages {
            log.push(message);
        }
        log
    }

    fn push(&mut self, message: Message) -> bool {
        if self.index.contains_key(&message.id) {
            return false;
        }
        self.index.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        true
    }

    fn reindex(&mut self) {
        self.index =
            self.messages.iter().enumerate().map(|(pos, m)| (m.id.clone(), pos)).collect();
    }
}

/// Ordered message history for every room, keyed by room identifier.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    logs: HashMap<RoomId, RoomLog>,
}

impl ConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns `false` if the identifier was already held.
    pub fn append(&mut self, room_id: &RoomId, message: Message) -> bool {
        let appended = self.logs.entry(room_id.clone()).or_default().push(message);
        if !appended {
            tracing::debug!(%room_id, "duplicate message delivery ignored");
        }
        appended
    }

    /// Replace content of a held message. Returns `true` if it changed.
    ///
    /// Unknown identifiers are ignored. An edit stamped older than the held
    /// copy is ignored so a late echo cannot undo a newer edit.
    pub fn edit_in_place(
        &mut self,
        room_id: &RoomId,
        message_id: &MessageId,
        content: &str,
        updated_at: Timestamp,
    ) -> bool {
        let Some(log) = self.logs.get_mut(room_id) else {
            return false;
        };
        let Some(&pos) = log.index.get(message_id) else {
            tracing::debug!(%room_id, %message_id, "edit for unknown message ignored");
            return false;
        };

        let message = &mut log.messages[pos];
        if updated_at < message.updated_at {
            tracing::debug!(%room_id, %message_id, "stale edit ignored");
            return false;
        }

        let changed = message.content != content || message.updated_at != updated_at;
        message.content = content.to_owned();
        message.updated_at = updated_at;
        changed
    }

    /// Remove a message. Returns the removed message, if it was held.
    pub fn remove(&mut self, room_id: &RoomId, message_id: &MessageId) -> Option<Message> {
        let log = self.logs.get_mut(room_id)?;
        let pos = log.index.remove(message_id)?;
        let removed = log.messages.remove(pos);
        log.reindex();
        Some(removed)
    }

    /// Ordered history of a room. Empty if nothing is held for it.
    pub fn history(&self, room_id: &RoomId) -> &[Message] {
        self.logs.get(room_id).map_or(&[], |log| log.messages.as_slice())
    }

    /// Look up one held message.
    pub fn get(&self, room_id: &RoomId, message_id: &MessageId) -> Option<&Message> {
        let log = self.logs.get(room_id)?;
        log.index.get(message_id).map(|&pos| &log.messages[pos])
    }

    /// Whether the message is held.
    pub fn contains(&self, room_id: &RoomId, message_id: &MessageId) -> bool {
        self.logs.get(room_id).is_some_and(|log| log.index.contains_key(message_id))
    }

    /// Replace a room's log wholesale with an authoritative history.
    ///
    /// Duplicates inside `history` keep their first occurrence.
    pub fn replace(&mut self, room_id: &RoomId, history: Vec<Message>) {
        self.logs.insert(room_id.clone(), RoomLog::from_messages(history));
    }

    /// Adopt a fetched history while keeping messages observed meanwhile.
    ///
    /// The fetched history comes first; held messages absent from it follow
    /// in their observed order. Held copies of messages present in the
    /// history are superseded by the fetched copy.
    pub fn merge_history(&mut self, room_id: &RoomId, history: Vec<Message>) {
        let fetched: HashSet<MessageId> = history.iter().map(|m| m.id.clone()).collect();
        let held = self.logs.remove(room_id).map(|log| log.messages).unwrap_or_default();

        let mut log = RoomLog::from_messages(history);
        for message in held.into_iter().filter(|m| !fetched.contains(&m.id)) {
            log.push(message);
        }
        self.logs.insert(room_id.clone(), log);
    }

    /// Drop everything held for a room.
    pub fn drop_room(&mut self, room_id: &RoomId) -> bool {
        self.logs.remove(room_id).is_some()
    }
}
