//! Synchronization coordinator for the roomsync client.
//!
//! Keeps the stores from `roomsync-core` convergent while the user's own
//! commands and the hub's push events race each other. Commands mutate the
//! stores only after the hub acknowledges them; pushes are merged
//! idempotently; a reconnect triggers a full resync of joined rooms.
//!
//! # Components
//!
//! - [`Hub`] / [`Account`]: collaborator traits for the remote hub and the
//!   signed-in user
//! - [`PushEvent`]: decoded push events, from [`RawPush`] wire form
//! - [`SyncState`]: pure reconciliation state machine over the stores
//! - [`SyncCoordinator`]: async command handling, push routing, resync and
//!   read-model publication
//! - [`Runtime`]: loop feeding [`HubSignal`]s and sweep ticks to a coordinator
//! - [`SystemEnv`]: production clock

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod coordinator;
mod error;
mod event;
mod hub;
mod read_model;
mod runtime;
mod state;
mod system_env;

pub use config::{
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TYPING_NOTICE_INTERVAL, DEFAULT_TYPING_TTL, SyncConfig,
};
pub use coordinator::SyncCoordinator;
pub use error::{CommandOutcome, SyncError};
pub use event::{EventName, HubSignal, PushEvent, RawPush};
pub use hub::{Account, Hub, StaticAccount};
pub use read_model::{ReadModel, RoomView};
pub use runtime::Runtime;
pub use state::{
    ConnectionState, Fence, JoinAck, ResyncSnapshot, RoomContents, RoomPhase, SyncState,
};
pub use system_env::SystemEnv;
