//! Virtual-clock environment for deterministic simulation.
//!
//! Time only moves when a test calls [`SimEnv::advance`]. Sleepers wake once
//! the virtual clock reaches their deadline, so typing expiry and the runtime
//! sweep can be exercised without real waiting.

use std::{
    ops::{Add, Sub},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use roomsync_core::{Environment, Timestamp};
use tokio::sync::Notify;

/// Wall-clock reading at virtual time zero (2023-11-14T22:13:20Z).
pub const DEFAULT_EPOCH_MILLIS: Timestamp = 1_700_000_000_000;

/// Instant on the virtual clock: time elapsed since the simulation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Instant at `elapsed` after simulation start.
    pub fn from_start(elapsed: Duration) -> Self {
        Self(elapsed)
    }

    /// Time since simulation start.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

#[derive(Debug)]
struct Clock {
    elapsed_nanos: AtomicU64,
    epoch_millis: Timestamp,
    ticked: Notify,
}

impl Clock {
    fn now(&self) -> SimInstant {
        SimInstant(Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst)))
    }
}

/// Simulation environment with a shared virtual clock.
///
/// Clones share the clock, so a hub and every client see the same time.
#[derive(Debug, Clone)]
pub struct SimEnv {
    clock: Arc<Clock>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Clock at zero, reading [`DEFAULT_EPOCH_MILLIS`] on the wall clock.
    pub fn new() -> Self {
        Self::with_epoch(DEFAULT_EPOCH_MILLIS)
    }

    /// Clock at zero, reading `epoch_millis` on the wall clock.
    pub fn with_epoch(epoch_millis: Timestamp) -> Self {
        Self {
            clock: Arc::new(Clock {
                elapsed_nanos: AtomicU64::new(0),
                epoch_millis,
                ticked: Notify::new(),
            }),
        }
    }

    /// Move the clock forward and wake sleepers whose deadline passed.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.clock.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
        self.clock.ticked.notify_waiters();
    }

    /// Time since simulation start.
    pub fn elapsed(&self) -> Duration {
        self.clock.now().elapsed()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        self.clock.now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let clock = Arc::clone(&self.clock);
        let deadline = clock.now() + duration;
        async move {
            loop {
                // Registered before the check so an advance in between is seen.
                let ticked = clock.ticked.notified();
                if clock.now() >= deadline {
                    return;
                }
                ticked.await;
            }
        }
    }

    fn wall_clock_millis(&self) -> Timestamp {
        let elapsed = u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.clock.epoch_millis.saturating_add(elapsed)
    }
}
