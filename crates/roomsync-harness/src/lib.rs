//! Deterministic simulation harness for the roomsync client.
//!
//! Provides a virtual clock ([`SimEnv`]), an in-memory authoritative hub
//! ([`SharedSimHub`]) speaking the JSON push format, and a seeded
//! multi-client [`Simulation`] that checks store invariants after every step
//! and convergence with the hub at the end.
//!
//! # Invariant Testing
//!
//! The `invariants` module captures client state into snapshots and checks
//! properties that must hold whatever order commands and pushes land in.
//! Use [`InvariantRegistry::standard()`] for the full set.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod invariants;
pub mod sim_env;
pub mod sim_hub;
pub mod simulation;

pub use invariants::{
    ActiveRoomInJoined, ClientSnapshot, ContentOnlyForJoinedRooms, Invariant, InvariantRegistry,
    JoinedRoomsListed, MessagesBelongToRoom, RoomSnapshot, SelfInJoinedRooms, SelfNotTyping,
    SystemSnapshot, UniqueMessageIds, Violation,
};
pub use sim_env::{DEFAULT_EPOCH_MILLIS, SimEnv, SimInstant};
pub use sim_hub::{
    HeldReply, PendingPush, SharedSimHub, SimHub, SimHubClient, SimHubError, interleave_by_room,
};
pub use simulation::{SimClient, SimConfig, SimError, SimStats, Simulation};
