//! Stores for the roomsync client engine.
//!
//! Plain owned collections with idempotent mutators, holding the client's
//! local view of rooms, message histories, participants, typing indicators
//! and memberships. Nothing here performs I/O or reads the clock; the
//! coordinator in `roomsync-client` is the only writer and feeds every store
//! the data and time it needs.
//!
//! # Components
//!
//! - [`RoomDirectory`]: every room known to exist, joined or not
//! - [`ConversationStore`]: per-room ordered message logs
//! - [`ParticipantRegistry`]: per-room participant sets
//! - [`TypingTracker`]: per-room typing entries with expiry
//! - [`MembershipTracker`]: joined rooms and the active room
//! - [`Environment`]: clock abstraction for real and simulated time

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod conversation;
mod directory;
pub mod env;
mod error;
mod membership;
mod participants;
mod types;
mod typing;

pub use conversation::ConversationStore;
pub use directory::{Provenance, RoomDirectory};
pub use env::Environment;
pub use error::StoreError;
pub use membership::MembershipTracker;
pub use participants::ParticipantRegistry;
pub use types::{Message, MessageId, Participant, Room, RoomId, Timestamp, UserId};
pub use typing::TypingTracker;
