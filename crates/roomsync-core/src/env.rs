//! Environment abstraction for deterministic testing.
//!
//! Decouples synchronization logic from system resources (monotonic time,
//! wall-clock time, sleeping). Enables deterministic simulation with a virtual
//! clock and production use with real system resources.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use crate::Timestamp;

/// Abstract environment providing time and async sleeping.
///
/// # Invariants
///
/// Implementations MUST guarantee that `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use a virtual instant that only moves when told to.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + std::fmt::Debug
        + Add<Duration, Output = Self::Instant>
        + Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code sleeps; store and reconciliation logic is handed
    /// `now` explicitly.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Wall-clock time in Unix milliseconds.
    ///
    /// Used to stamp locally acknowledged edits. Not monotonic.
    fn wall_clock_millis(&self) -> Timestamp;
}
