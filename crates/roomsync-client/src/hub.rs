//! Collaborator traits: the remote hub and the account provider.
//!
//! The [`Hub`] trait decouples the coordinator from the real-time channel
//! client. Implementations only need "send request, await reply"; push events
//! reach the coordinator separately as [`crate::HubSignal`]s. The same
//! coordinator code therefore runs against a production transport and the
//! in-memory simulation hub.

use std::future::Future;

use roomsync_core::{Message, MessageId, Participant, Room, RoomId, UserId};

/// Request/response capabilities of the remote hub.
///
/// Every method issues exactly one request. Implementations may be called
/// concurrently from several in-flight commands.
///
/// # Associated Types
///
/// - [`Error`](Hub::Error): transport- or hub-specific failure type,
///   surfaced to callers as [`crate::SyncError::RequestFailed`]
pub trait Hub: Send + Sync {
    /// Hub-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Full room listing.
    fn get_all_rooms(&self) -> impl Future<Output = Result<Vec<Room>, Self::Error>> + Send;

    /// One room by identifier.
    fn get_room(&self, room_id: &RoomId) -> impl Future<Output = Result<Room, Self::Error>> + Send;

    /// Create a room; the creator is joined to it.
    fn create_room(&self, name: &str) -> impl Future<Output = Result<Room, Self::Error>> + Send;

    /// Join a room, returning its history.
    fn join_room(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Vec<Message>, Self::Error>> + Send;

    /// Leave a room.
    fn leave_room(&self, room_id: &RoomId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a message, returning the stored copy with its assigned identifier.
    fn send_message(
        &self,
        room_id: &RoomId,
        text: &str,
    ) -> impl Future<Output = Result<Message, Self::Error>> + Send;

    /// Replace a message's content, returning the stored copy with the
    /// hub's edit stamp.
    fn edit_message(
        &self,
        room_id: &RoomId,
        message_id: &MessageId,
        text: &str,
    ) -> impl Future<Output = Result<Message, Self::Error>> + Send;

    /// Delete a message.
    fn delete_message(
        &self,
        message_id: &MessageId,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Announce that the current user is typing.
    fn notify_typing(&self, room_id: &RoomId)
    -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Announce that the current user stopped typing.
    fn notify_stopped_typing(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Full history of a joined room. Used by resync.
    fn get_history(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Vec<Message>, Self::Error>> + Send;

    /// Current participants of a room. Used by resync.
    fn get_participants(
        &self,
        room_id: &RoomId,
    ) -> impl Future<Output = Result<Vec<Participant>, Self::Error>> + Send;
}

/// Supplies the signed-in user.
pub trait Account: Send + Sync {
    /// Profile of the current user, as it appears in participant sets.
    fn current_user(&self) -> Participant;

    /// Identifier of the current user.
    fn current_user_id(&self) -> UserId {
        self.current_user().user_id
    }
}

/// Account with a fixed profile.
#[derive(Debug, Clone)]
pub struct StaticAccount {
    profile: Participant,
}

impl StaticAccount {
    /// Account for the given profile.
    pub fn new(profile: Participant) -> Self {
        Self { profile }
    }
}

impl Account for StaticAccount {
    fn current_user(&self) -> Participant {
        self.profile.clone()
    }
}
