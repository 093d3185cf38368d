//! Entities shared by every store.
//!
//! Identifiers are opaque, server-assigned strings. They are wrapped in
//! newtypes so a [`RoomId`] can never be passed where a [`MessageId`] is
//! expected. All entities serialize with camelCase field names, matching the
//! JSON payloads the hub pushes.

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Raw identifier string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Identifier is empty or whitespace only.
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Globally unique room identifier. Never changes after creation.
    RoomId
);

string_id!(
    /// Message identifier, unique within the system.
    MessageId
);

string_id!(
    /// User identifier.
    UserId
);

/// A named chat channel.
///
/// `participant_ids` is a denormalized summary taken from whatever payload
/// delivered the room. The authoritative participant set lives in
/// [`crate::ParticipantRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Server-assigned identifier.
    pub id: RoomId,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last update time. Used to reject stale copies.
    pub updated_at: Timestamp,
    /// Room accepts no new messages.
    #[serde(default)]
    pub read_only: bool,
    /// Participant summary, in server order.
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
}

impl Room {
    /// Room with no participants, created and updated at `at`.
    pub fn new(id: impl Into<RoomId>, name: impl Into<String>, at: Timestamp) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at: at,
            updated_at: at,
            read_only: false,
            participant_ids: Vec::new(),
        }
    }

    /// Placeholder for a room known only by identifier.
    ///
    /// Carries `updated_at == 0`, so any real copy of the room replaces it.
    pub fn placeholder(id: RoomId) -> Self {
        let name = id.to_string();
        Self::new(id, name, 0)
    }

    /// Whether `user` appears in the participant summary.
    pub fn lists_participant(&self, user: &UserId) -> bool {
        self.participant_ids.iter().any(|p| p == user)
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message identifier.
    pub id: MessageId,
    /// Owning room.
    pub room_id: RoomId,
    /// Author identifier.
    pub author_id: UserId,
    /// Author display name at the time of sending.
    pub author_name: String,
    /// Author avatar, if any.
    #[serde(default)]
    pub author_avatar: Option<String>,
    /// Text content.
    pub content: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last edit time. Equal to `created_at` until edited.
    pub updated_at: Timestamp,
    /// Synthetic message such as "X joined", not authored by a user.
    #[serde(default)]
    pub is_system: bool,
}

impl Message {
    /// Message has been edited since creation.
    pub fn is_edited(&self) -> bool {
        self.updated_at > self.created_at
    }
}

/// A user's presence in one room, with denormalized display fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// User identifier.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Avatar URL, if any.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Participant {
    /// Participant without an avatar.
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), display_name: display_name.into(), avatar_url: None }
    }
}
