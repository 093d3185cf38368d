//! Seeded multi-client simulation.
//!
//! A [`Simulation`] drives several [`SyncCoordinator`]s against one
//! [`SharedSimHub`]. Each step picks a client and a random action: a command,
//! a partial push delivery, a clock advance or, with faults enabled, a
//! disconnect, an injected request failure, an out-of-band room change or a
//! malformed push. Store invariants are checked after every step.
//!
//! With overlap enabled, some commands have their hub reply parked: the hub
//! has applied the request, but before the acknowledgement lands the same
//! client issues another command and takes its queued pushes, echoes of the
//! parked request included.
//!
//! After the last step the simulation settles: failures are cleared, every
//! client reconnects and resyncs, and all queued pushes are delivered. Every
//! client must then agree with the hub on the directory, its memberships,
//! and the histories and participants of its joined rooms.
//!
//! The same seed always produces the same run.

use std::{collections::BTreeMap, pin::Pin, sync::Arc, time::Duration};

use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;
use roomsync_client::{
    HubSignal, RawPush, StaticAccount, SyncConfig, SyncCoordinator, SyncError, SyncState,
};
use roomsync_core::{Environment, Message, MessageId, Participant, Room, RoomId, UserId};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    SimEnv, SimInstant,
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot},
    sim_hub::{SharedSimHub, SimHubClient, interleave_by_room},
};

/// Coordinator type driven by the simulation.
pub type SimClient = SyncCoordinator<SimHubClient, StaticAccount, SimEnv>;

/// A command in flight whose outcome no longer matters beyond success.
type PendingCommand = Pin<Box<dyn Future<Output = Result<(), SyncError>>>>;

/// Hub operations that fault injection may fail.
const FAILABLE: [&str; 8] = [
    "GetAllRooms",
    "JoinRoom",
    "LeaveRoom",
    "SendMessage",
    "EditMessage",
    "GetHistory",
    "GetParticipants",
    "GetRoom",
];

/// Simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// RNG seed.
    pub seed: u64,
    /// Number of clients, each with its own user.
    pub clients: usize,
    /// Random steps before settling.
    pub steps: usize,
    /// Deliver a client's queued pushes before each of its commands.
    pub lockstep: bool,
    /// Enable disconnects, request failures, out-of-band room changes and
    /// malformed pushes.
    pub faults: bool,
    /// Park some hub replies while the client runs another command and
    /// takes its pushes.
    pub overlap: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { seed: 0, clients: 3, steps: 200, lockstep: false, faults: false, overlap: true }
    }
}

impl SimConfig {
    /// Default parameters with the given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, ..Self::default() }
    }
}

/// Counters gathered over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Steps executed.
    pub steps: usize,
    /// Commands issued.
    pub commands: usize,
    /// Commands that returned an error.
    pub rejected: usize,
    /// Commands whose hub reply was parked.
    pub overlapped: usize,
    /// Pushes handed to clients.
    pub pushes_delivered: usize,
    /// Resyncs attempted, including the final ones.
    pub resyncs: usize,
    /// Faults injected.
    pub faults: usize,
}

/// Ways a simulation run can fail.
#[derive(Error, Debug)]
pub enum SimError {
    /// A store invariant broke.
    #[error("invariant violated after step {step}: {summary}")]
    InvariantViolated {
        /// Step after which the check ran.
        step: usize,
        /// Every violation, one per line.
        summary: String,
    },
    /// A client disagrees with the hub after settling.
    #[error("client {user} diverged: {detail}")]
    Diverged {
        /// Diverging client's user.
        user: UserId,
        /// What differs.
        detail: String,
    },
    /// A settling resync failed with no faults pending.
    #[error("resync failed for {user}")]
    Resync {
        /// Client's user.
        user: UserId,
        /// Underlying failure.
        #[source]
        source: SyncError,
    },
}

/// A seeded run over one hub and several clients.
pub struct Simulation {
    config: SimConfig,
    rng: ChaCha8Rng,
    env: SimEnv,
    hub: SharedSimHub,
    clients: Vec<Arc<SimClient>>,
    registry: InvariantRegistry,
    stats: SimStats,
    counter: u64,
}

impl Simulation {
    /// Set up a hub and `config.clients` connected clients.
    ///
    /// `config.clients` must be at least one.
    pub fn new(config: SimConfig) -> Self {
        let env = SimEnv::new();
        let hub = SharedSimHub::new(env.clone());
        let clients = (0..config.clients)
            .map(|n| {
                let profile = Participant::new(format!("user-{n}"), format!("User {n}"));
                let hub_client = hub.connect(profile.clone());
                Arc::new(SyncCoordinator::new(
                    hub_client,
                    StaticAccount::new(profile),
                    env.clone(),
                    SyncConfig::default(),
                ))
            })
            .collect();

        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            env,
            hub,
            clients,
            registry: InvariantRegistry::standard(),
            stats: SimStats::default(),
            counter: 0,
        }
    }

    /// The shared hub.
    pub fn hub(&self) -> &SharedSimHub {
        &self.hub
    }

    /// The shared clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Simulated clients, in creation order.
    pub fn clients(&self) -> &[Arc<SimClient>] {
        &self.clients
    }

    /// Counters so far.
    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Run every step, settle and check convergence.
    pub async fn run(&mut self) -> Result<SimStats, SimError> {
        info!(seed = self.config.seed, clients = self.clients.len(), "simulation started");
        for client in &self.clients {
            // Nothing is failed yet, so the first listing always succeeds.
            let _ = client.load_directory().await;
        }

        for step in 0..self.config.steps {
            self.step().await;
            self.stats.steps += 1;
            self.check_invariants(step).await?;
        }

        self.settle().await?;
        if self.config.lockstep && !self.config.faults {
            self.check_push_convergence().await?;
        }
        self.resync_all().await?;
        self.check_convergence().await?;

        info!(stats = ?self.stats, "simulation converged");
        Ok(self.stats)
    }

    /// Execute one random step.
    pub async fn step(&mut self) {
        let idx = self.rng.gen_range(0..self.clients.len());
        let client = Arc::clone(&self.clients[idx]);
        if self.config.lockstep {
            self.deliver(idx, usize::MAX).await;
        }
        if self.config.overlap && self.rng.gen_ratio(1, 8) {
            self.overlapped(idx).await;
            return;
        }

        let mut roll = self.rng.gen_range(0..100u32);
        if !self.config.faults && roll >= 85 {
            roll = 64;
        }

        match roll {
            0..64 => self.command(&client, roll).await,
            64..80 => {
                let max = self.rng.gen_range(1..=8);
                self.deliver(idx, max).await;
            },
            80..85 => {
                let millis = self.rng.gen_range(100..4_000);
                self.env.advance(Duration::from_millis(millis));
                for client in &self.clients {
                    client.sweep_typing().await;
                }
            },
            85..89 => self.toggle_connection(&client).await,
            89..93 => {
                let user = client.current_user_id();
                if let Some(operation) = self.pick(&FAILABLE) {
                    debug!(%user, operation, "injecting failure");
                    self.hub.fail_next(&user, operation);
                    self.stats.faults += 1;
                }
            },
            93..95 => {
                let rooms = self.hub_rooms();
                if let Some(room_id) = self.pick(&rooms) {
                    debug!(%room_id, "deleting room out of band");
                    self.hub.delete_room(&room_id);
                    self.stats.faults += 1;
                }
            },
            95..97 => {
                let rooms = self.hub.with_hub(|h| h.rooms());
                if let Some(room) = self.pick(&rooms) {
                    self.hub.set_read_only(&room.id, !room.read_only);
                    self.stats.faults += 1;
                }
            },
            _ => {
                let user = client.current_user_id();
                let push = self.malformed_push();
                self.hub.inject(&user, RoomId::from("room-malformed"), push);
                self.stats.faults += 1;
            },
        }
    }

    /// Issue one of the client commands selected by `roll` below 64.
    async fn command(&mut self, client: &SimClient, roll: u32) {
        match roll {
            0..8 => {
                let name = self.text("room");
                let result = client.create_room(&name).await;
                self.record("create room", result);
            },
            8..20 => {
                let rooms = self.hub_rooms();
                if let Some(room_id) = self.pick(&rooms) {
                    let result = client.join_room(&room_id).await;
                    self.record("join room", result);
                }
            },
            20..26 => {
                if let Some(room_id) = self.pick_joined(client).await {
                    let result = client.leave_room(&room_id).await;
                    self.record("leave room", result);
                }
            },
            26..44 => {
                if let Some(room_id) = self.pick_joined(client).await {
                    let text = self.text("hello");
                    let result = client.send_message(&room_id, &text).await;
                    self.record("send message", result);
                }
            },
            44..50 => {
                if let Some((room_id, message_id)) = self.pick_own_message(&client).await {
                    let text = self.text("edited");
                    let result = client.edit_message(&room_id, &message_id, &text).await;
                    self.record("edit message", result);
                }
            },
            50..54 => {
                if let Some((room_id, message_id)) = self.pick_own_message(&client).await {
                    let result = client.delete_message(&room_id, &message_id).await;
                    self.record("delete message", result);
                }
            },
            54..60 => {
                if let Some(room_id) = self.pick_joined(client).await {
                    if self.rng.gen_bool(0.7) {
                        let result = client.notify_typing(&room_id).await;
                        self.record("notify typing", result);
                    } else {
                        let result = client.notify_stopped_typing(&room_id).await;
                        self.record("notify stopped typing", result);
                    }
                }
            },
            _ => {
                let target =
                    if self.rng.gen_bool(0.1) { None } else { self.pick_joined(client).await };
                let result = client.set_active(target.as_ref()).await;
                self.record("set active", result);
            },
        }
    }

    /// Issue a command with its hub reply parked. While it waits, the same
    /// client runs another command and then takes every queued push.
    async fn overlapped(&mut self, idx: usize) {
        let client = Arc::clone(&self.clients[idx]);
        let user = client.current_user_id();
        let issuer = Arc::clone(&client);
        let connected = self.hub.with_hub(|h| h.is_connected(&user));

        let roll = self.rng.gen_range(0..6);
        let (operation, mut command): (&'static str, PendingCommand) = match roll {
            0 => ("GetAllRooms", pending(async move { issuer.load_directory().await })),
            1 if connected => {
                self.stats.resyncs += 1;
                ("GetAllRooms", pending(async move { issuer.resync().await }))
            },
            2 => {
                let name = self.text("room");
                ("CreateRoom", pending(async move { issuer.create_room(&name).await.map(drop) }))
            },
            3 => {
                let rooms = self.hub_rooms();
                let Some(room_id) = self.pick(&rooms) else {
                    return;
                };
                ("JoinRoom", pending(async move { issuer.join_room(&room_id).await.map(drop) }))
            },
            4 => {
                let Some(room_id) = self.pick_joined(&client).await else {
                    return;
                };
                ("LeaveRoom", pending(async move { issuer.leave_room(&room_id).await.map(drop) }))
            },
            _ => {
                let Some(room_id) = self.pick_joined(&client).await else {
                    return;
                };
                let text = self.text("hello");
                let send = async move { issuer.send_message(&room_id, &text).await.map(drop) };
                ("SendMessage", pending(send))
            },
        };

        let mut held = self.hub.hold_reply(&user, operation);
        let finished = tokio::select! {
            biased;
            result = &mut command => Some(result),
            _ = held.arrived() => None,
        };

        let result = match finished {
            Some(result) => {
                self.hub.drop_holds(&user);
                result
            },
            None => {
                debug!(%user, operation, "reply parked");
                self.stats.overlapped += 1;
                let roll = self.rng.gen_range(0..64);
                self.command(&client, roll).await;
                self.deliver(idx, usize::MAX).await;
                held.release();
                command.await
            },
        };
        self.record("overlapped command", result);
    }

    /// Deliver up to `max` queued pushes to one client, shuffled across
    /// rooms.
    async fn deliver(&mut self, idx: usize, max: usize) {
        let client = Arc::clone(&self.clients[idx]);
        let pushes = self.hub.take_pushes(&client.current_user_id(), max);
        for pending in interleave_by_room(pushes, &mut self.rng) {
            client.handle_push(&pending.push).await;
            self.stats.pushes_delivered += 1;
        }
    }

    fn hub_rooms(&self) -> Vec<RoomId> {
        self.hub.with_hub(|h| h.rooms()).into_iter().map(|r| r.id).collect()
    }

    async fn deliver_all(&mut self) {
        loop {
            let backlog = (0..self.clients.len()).find(|&idx| {
                let user = self.clients[idx].current_user_id();
                self.hub.with_hub(|h| h.pending(&user)) > 0
            });
            let Some(idx) = backlog else {
                break;
            };
            self.deliver(idx, usize::MAX).await;
        }
    }

    async fn toggle_connection(&mut self, client: &SimClient) {
        let user = client.current_user_id();
        self.stats.faults += 1;
        if self.hub.with_hub(|h| h.is_connected(&user)) {
            debug!(%user, "disconnecting");
            self.hub.disconnect(&user);
            let _ = client.handle_signal(HubSignal::Disconnected).await;
        } else {
            debug!(%user, "reconnecting");
            self.hub.reconnect(&user);
            self.stats.resyncs += 1;
            if let Err(err) = client.handle_signal(HubSignal::Reconnected).await {
                debug!(%user, error = %err, "resync failed");
            }
        }
    }

    /// Clear faults, reconnect everyone and deliver every queued push.
    async fn settle(&mut self) -> Result<(), SimError> {
        self.hub.clear_failures();
        for client in self.clients.clone() {
            let user = client.current_user_id();
            if !self.hub.with_hub(|h| h.is_connected(&user)) {
                self.hub.reconnect(&user);
                self.stats.resyncs += 1;
                client
                    .handle_signal(HubSignal::Reconnected)
                    .await
                    .map_err(|source| SimError::Resync { user, source })?;
            }
        }
        self.deliver_all().await;
        Ok(())
    }

    async fn resync_all(&mut self) -> Result<(), SimError> {
        for client in &self.clients {
            self.stats.resyncs += 1;
            client
                .resync()
                .await
                .map_err(|source| SimError::Resync { user: client.current_user_id(), source })?;
        }
        Ok(())
    }

    async fn check_invariants(&self, step: usize) -> Result<(), SimError> {
        let now = self.env.now();
        let mut clients = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            clients.push(client.with_state(|state| ClientSnapshot::from_state(state, now)).await);
        }

        self.registry.check_all(&SystemSnapshot::from_clients(clients)).map_err(|violations| {
            let summary: Vec<String> = violations.iter().map(ToString::to_string).collect();
            SimError::InvariantViolated { step, summary: summary.join("\n") }
        })
    }

    /// Convergence reachable through pushes alone: memberships, message
    /// sets and participant sets match the hub. Message order may differ,
    /// since acknowledgements land where they were observed.
    async fn check_push_convergence(&self) -> Result<(), SimError> {
        for client in &self.clients {
            let user = client.current_user_id();
            let view = client.with_state(ClientView::capture).await;
            let expected = self.hub_view(&user);

            if view.rooms != expected.rooms {
                return diverged(&user, "listed rooms", &view.rooms, &expected.rooms);
            }
            if view.joined != expected.joined {
                return diverged(&user, "memberships", &view.joined, &expected.joined);
            }
            for room_id in &expected.joined {
                let held = by_id(&view.histories[room_id]);
                let authoritative = by_id(&expected.histories[room_id]);
                if held != authoritative {
                    return diverged(&user, &format!("history of {room_id}"), &held, &authoritative);
                }
                if view.participants[room_id] != expected.participants[room_id] {
                    return diverged(
                        &user,
                        &format!("participants of {room_id}"),
                        &view.participants[room_id],
                        &expected.participants[room_id],
                    );
                }
            }
        }
        Ok(())
    }

    /// Full convergence after a resync: the directory, memberships, and the
    /// ordered histories and participant sets of joined rooms equal the hub's.
    async fn check_convergence(&self) -> Result<(), SimError> {
        for client in &self.clients {
            let user = client.current_user_id();
            let directory =
                client.with_state(|state| sorted_rooms(state.directory().list_all())).await;
            let authoritative = sorted_rooms(self.hub.with_hub(|h| h.rooms()));
            if directory != authoritative {
                return diverged(&user, "directory", &directory, &authoritative);
            }

            let view = client.with_state(ClientView::capture).await;
            let expected = self.hub_view(&user);
            if view.joined != expected.joined {
                return diverged(&user, "memberships", &view.joined, &expected.joined);
            }
            if view.histories != expected.histories {
                return diverged(&user, "histories", &view.histories, &expected.histories);
            }
            if view.participants != expected.participants {
                let (held, authoritative) = (&view.participants, &expected.participants);
                return diverged(&user, "participants", held, authoritative);
            }
        }
        Ok(())
    }

    fn hub_view(&self, user: &UserId) -> ClientView {
        self.hub.with_hub(|h| {
            let joined = h.memberships(user);
            ClientView {
                rooms: h.rooms().into_iter().map(|r| r.id).collect(),
                histories: joined.iter().map(|id| (id.clone(), h.history(id))).collect(),
                participants: joined
                    .iter()
                    .map(|id| (id.clone(), sorted_ids(h.members(id))))
                    .collect(),
                joined: joined.into_iter().collect(),
            }
        })
    }

    fn record<T>(&mut self, command: &'static str, result: Result<T, SyncError>) {
        self.stats.commands += 1;
        if let Err(err) = result {
            debug!(command, error = %err, "command rejected");
            self.stats.rejected += 1;
        }
    }

    fn text(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{prefix} {}", self.counter)
    }

    fn pick<T: Clone>(&mut self, items: &[T]) -> Option<T> {
        items.choose(&mut self.rng).cloned()
    }

    async fn pick_joined(&mut self, client: &SimClient) -> Option<RoomId> {
        let joined: Vec<RoomId> =
            client.with_state(|state| state.membership().joined().cloned().collect()).await;
        self.pick(&joined)
    }

    async fn pick_own_message(&mut self, client: &SimClient) -> Option<(RoomId, MessageId)> {
        let me = client.current_user_id();
        let own: Vec<(RoomId, MessageId)> = client
            .with_state(|state| {
                state
                    .membership()
                    .joined()
                    .flat_map(|room_id| {
                        state
                            .conversations()
                            .history(room_id)
                            .iter()
                            .filter(|m| m.author_id == me)
                            .map(|m| (room_id.clone(), m.id.clone()))
                            .collect::<Vec<_>>()
                    })
                    .collect()
            })
            .await;
        self.pick(&own)
    }

    fn malformed_push(&mut self) -> RawPush {
        match self.rng.gen_range(0..4) {
            0 => RawPush::new("room-renamed", serde_json::json!({ "roomId": "room-1" })),
            1 => RawPush::new("message-created", serde_json::json!({ "roomId": 7 })),
            2 => {
                RawPush::new("participant-left", serde_json::json!({ "roomId": "", "userId": "x" }))
            },
            _ => RawPush::new("typing-started", serde_json::Value::Null),
        }
    }
}

fn pending(command: impl Future<Output = Result<(), SyncError>> + 'static) -> PendingCommand {
    Box::pin(command)
}

/// A client's holdings in comparable form.
#[derive(Debug, PartialEq, Eq)]
struct ClientView {
    rooms: std::collections::BTreeSet<RoomId>,
    joined: std::collections::BTreeSet<RoomId>,
    histories: BTreeMap<RoomId, Vec<Message>>,
    participants: BTreeMap<RoomId, Vec<UserId>>,
}

impl ClientView {
    fn capture(state: &SyncState<SimInstant>) -> Self {
        let joined: Vec<RoomId> = state.membership().joined().cloned().collect();
        Self {
            rooms: state.directory().iter().map(|r| r.id.clone()).collect(),
            histories: joined
                .iter()
                .map(|id| (id.clone(), state.conversations().history(id).to_vec()))
                .collect(),
            participants: joined
                .iter()
                .map(|id| (id.clone(), sorted_ids(state.participants().participants_of(id))))
                .collect(),
            joined: joined.into_iter().collect(),
        }
    }
}

fn sorted_ids(participants: Vec<Participant>) -> Vec<UserId> {
    let mut ids: Vec<UserId> = participants.into_iter().map(|p| p.user_id).collect();
    ids.sort();
    ids
}

fn sorted_rooms(mut rooms: Vec<Room>) -> Vec<Room> {
    rooms.sort_by(|a, b| a.id.cmp(&b.id));
    rooms
}

fn by_id(history: &[Message]) -> BTreeMap<MessageId, Message> {
    history.iter().map(|m| (m.id.clone(), m.clone())).collect()
}

fn diverged<T: std::fmt::Debug>(
    user: &UserId,
    what: &str,
    held: &T,
    authoritative: &T,
) -> Result<(), SimError> {
    Err(SimError::Diverged {
        user: user.clone(),
        detail: format!("{what}: holds {held:?}, hub has {authoritative:?}"),
    })
}
