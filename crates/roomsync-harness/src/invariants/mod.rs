//! Store invariants checked after every simulation step.
//!
//! Every check looks at one client at a time: clients never share stores,
//! so there is nothing to compare across them until the run settles (see
//! the convergence checks in [`crate::Simulation`]). A [`ClientSnapshot`]
//! is captured from each [`roomsync_client::SyncState`] and handed to every
//! registered check.
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = SystemSnapshot::single(ClientSnapshot::from_state(&state, now));
//! registry.check_all(&snapshot)?;
//! ```

use roomsync_core::UserId;
use thiserror::Error;

mod checks;
mod snapshot;

pub use checks::{
    ActiveRoomInJoined, ContentOnlyForJoinedRooms, JoinedRoomsListed, MessagesBelongToRoom,
    SelfInJoinedRooms, SelfNotTyping, UniqueMessageIds,
};
pub use snapshot::{ClientSnapshot, RoomSnapshot, SystemSnapshot};

/// A check that failed for one client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{invariant} (client {user}): {message}")]
pub struct Violation {
    /// Name of the failed check.
    pub invariant: &'static str,
    /// Client whose stores broke it.
    pub user: UserId,
    /// What was found.
    pub message: String,
}

/// A property of one client's stores.
pub trait Invariant: Send + Sync {
    /// Name used in violation reports.
    fn name(&self) -> &'static str;

    /// Describe the first offending entry, if any.
    fn check(&self, client: &ClientSnapshot) -> Result<(), String>;
}

/// Checks run against every client of a snapshot.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// Every store invariant the client maintains.
    pub fn standard() -> Self {
        Self { invariants: Vec::new() }
            .with(ActiveRoomInJoined)
            .with(JoinedRoomsListed)
            .with(UniqueMessageIds)
            .with(MessagesBelongToRoom)
            .with(ContentOnlyForJoinedRooms)
            .with(SelfInJoinedRooms)
            .with(SelfNotTyping)
    }

    /// Registry extended with one more check.
    #[must_use]
    pub fn with(mut self, invariant: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    /// Names of the registered checks, in run order.
    pub fn names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|inv| inv.name()).collect()
    }

    /// Run every check on every client, collecting all violations.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<Violation> = state
            .clients
            .iter()
            .flat_map(|client| {
                self.invariants.iter().filter_map(move |inv| {
                    inv.check(client).err().map(|message| Violation {
                        invariant: inv.name(),
                        user: client.user.clone(),
                        message,
                    })
                })
            })
            .collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_runs_every_check() {
        let names = InvariantRegistry::standard().names();
        assert_eq!(names.len(), 7);
        assert_eq!(names[0], "active_room_in_joined");
    }

    #[test]
    fn empty_snapshot_passes() {
        assert!(InvariantRegistry::standard().check_all(&SystemSnapshot::empty()).is_ok());
    }

    #[test]
    fn violations_name_the_client() {
        let snapshot = SystemSnapshot::from_clients(vec![
            ClientSnapshot::new("ada"),
            ClientSnapshot::new("bo").with_active_room(Some("r1".into())),
        ]);

        let violations = InvariantRegistry::standard().check_all(&snapshot).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].user, UserId::from("bo"));
        assert_eq!(violations[0].invariant, "active_room_in_joined");
    }
}
