//! Push events and transport signals.
//!
//! The hub delivers push events as a name plus a JSON payload ([`RawPush`]).
//! [`PushEvent::decode`] turns that into a typed event, rejecting unknown
//! names, missing fields and blank identifiers as
//! [`SyncError::MalformedPush`]. The transport also reports connection
//! changes; both kinds of input reach the coordinator as [`HubSignal`]s.

use std::{fmt, str::FromStr};

use roomsync_core::{Message, MessageId, Participant, Room, RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SyncError;

/// Names of the push events the hub emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    /// `room-created`
    RoomCreated,
    /// `room-deleted`
    RoomDeleted,
    /// `message-created`
    MessageCreated,
    /// `message-edited`
    MessageEdited,
    /// `message-deleted`
    MessageDeleted,
    /// `participant-joined`
    ParticipantJoined,
    /// `participant-left`
    ParticipantLeft,
    /// `typing-started`
    TypingStarted,
    /// `typing-stopped`
    TypingStopped,
}

impl EventName {
    /// Every event name, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::RoomCreated,
        Self::RoomDeleted,
        Self::MessageCreated,
        Self::MessageEdited,
        Self::MessageDeleted,
        Self::ParticipantJoined,
        Self::ParticipantLeft,
        Self::TypingStarted,
        Self::TypingStopped,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoomCreated => "room-created",
            Self::RoomDeleted => "room-deleted",
            Self::MessageCreated => "message-created",
            Self::MessageEdited => "message-edited",
            Self::MessageDeleted => "message-deleted",
            Self::ParticipantJoined => "participant-joined",
            Self::ParticipantLeft => "participant-left",
            Self::TypingStarted => "typing-started",
            Self::TypingStopped => "typing-stopped",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| SyncError::malformed(s, "unknown event name"))
    }
}

/// Push event as received from the transport, before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPush {
    /// Event name.
    pub event: String,
    /// JSON payload.
    pub payload: Value,
}

impl RawPush {
    /// Raw push with the given name and payload.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self { event: event.into(), payload }
    }
}

/// Decoded push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum PushEvent {
    /// A room now exists.
    RoomCreated(Room),
    /// A room no longer exists.
    RoomDeleted {
        /// Deleted room.
        room_id: RoomId,
    },
    /// A message was posted.
    MessageCreated(Message),
    /// A message was edited; carries the updated copy.
    MessageEdited(Message),
    /// A message was deleted.
    MessageDeleted {
        /// Owning room.
        room_id: RoomId,
        /// Deleted message.
        message_id: MessageId,
    },
    /// A user entered a room.
    ParticipantJoined {
        /// Room entered.
        room_id: RoomId,
        /// The user, with display fields.
        participant: Participant,
    },
    /// A user left a room.
    ParticipantLeft {
        /// Room left.
        room_id: RoomId,
        /// The user.
        user_id: UserId,
    },
    /// A user started typing.
    TypingStarted {
        /// Room typed in.
        room_id: RoomId,
        /// The typist.
        user_id: UserId,
    },
    /// A user stopped typing.
    TypingStopped {
        /// Room typed in.
        room_id: RoomId,
        /// The typist.
        user_id: UserId,
    },
}

impl PushEvent {
    /// Decode and validate a raw push.
    pub fn decode(raw: &RawPush) -> Result<Self, SyncError> {
        let name: EventName = raw.event.parse()?;
        let envelope = serde_json::json!({ "event": name.as_str(), "payload": raw.payload });
        let event: Self = serde_json::from_value(envelope)
            .map_err(|e| SyncError::malformed(&raw.event, e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Encode into wire form.
    pub fn encode(&self) -> Result<RawPush, serde_json::Error> {
        let envelope = serde_json::to_value(self)?;
        let payload = envelope.get("payload").cloned().unwrap_or(Value::Null);
        Ok(RawPush::new(self.name().as_str(), payload))
    }

    /// Name of this event.
    pub fn name(&self) -> EventName {
        match self {
            Self::RoomCreated(_) => EventName::RoomCreated,
            Self::RoomDeleted { .. } => EventName::RoomDeleted,
            Self::MessageCreated(_) => EventName::MessageCreated,
            Self::MessageEdited(_) => EventName::MessageEdited,
            Self::MessageDeleted { .. } => EventName::MessageDeleted,
            Self::ParticipantJoined { .. } => EventName::ParticipantJoined,
            Self::ParticipantLeft { .. } => EventName::ParticipantLeft,
            Self::TypingStarted { .. } => EventName::TypingStarted,
            Self::TypingStopped { .. } => EventName::TypingStopped,
        }
    }

    /// Room the event concerns.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::RoomCreated(room) => &room.id,
            Self::MessageCreated(message) | Self::MessageEdited(message) => &message.room_id,
            Self::RoomDeleted { room_id }
            | Self::MessageDeleted { room_id, .. }
            | Self::ParticipantJoined { room_id, .. }
            | Self::ParticipantLeft { room_id, .. }
            | Self::TypingStarted { room_id, .. }
            | Self::TypingStopped { room_id, .. } => room_id,
        }
    }

    fn validate(&self) -> Result<(), SyncError> {
        let blank = match self {
            Self::RoomCreated(room) => room.id.is_blank().then_some("room id"),
            Self::MessageCreated(message) | Self::MessageEdited(message) => {
                if message.id.is_blank() {
                    Some("message id")
                } else if message.room_id.is_blank() {
                    Some("room id")
                } else if message.author_id.is_blank() && !message.is_system {
                    Some("author id")
                } else {
                    None
                }
            },
            Self::MessageDeleted { room_id, message_id } => {
                if room_id.is_blank() {
                    Some("room id")
                } else {
                    message_id.is_blank().then_some("message id")
                }
            },
            Self::ParticipantJoined { room_id, participant } => {
                if room_id.is_blank() {
                    Some("room id")
                } else {
                    participant.user_id.is_blank().then_some("user id")
                }
            },
            Self::RoomDeleted { room_id } => room_id.is_blank().then_some("room id"),
            Self::ParticipantLeft { room_id, user_id }
            | Self::TypingStarted { room_id, user_id }
            | Self::TypingStopped { room_id, user_id } => {
                if room_id.is_blank() {
                    Some("room id")
                } else {
                    user_id.is_blank().then_some("user id")
                }
            },
        };

        match blank {
            Some(field) => {
                Err(SyncError::malformed(self.name().as_str(), format!("blank {field}")))
            },
            None => Ok(()),
        }
    }
}

/// Input from the transport to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum HubSignal {
    /// A push event arrived.
    Push(RawPush),
    /// The transport lost its connection.
    Disconnected,
    /// The transport re-established its connection; pushes may have been
    /// missed in between.
    Reconnected,
}
