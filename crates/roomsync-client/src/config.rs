//! Coordinator configuration.

use std::time::Duration;

/// Default lifetime of a typing entry without refresh.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(5);

/// Default period of the typing expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default minimum spacing between outgoing typing notices per room.
pub const DEFAULT_TYPING_NOTICE_INTERVAL: Duration = Duration::from_secs(3);

/// Tunables for [`crate::SyncCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Lifetime given to a typing-started push.
    pub typing_ttl: Duration,
    /// How often the runtime sweeps elapsed typing entries.
    pub sweep_interval: Duration,
    /// Minimum spacing between `NotifyTyping` requests for one room.
    pub typing_notice_interval: Duration,
    /// Focus a freshly joined room when no room is active.
    pub activate_on_join: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_ttl: DEFAULT_TYPING_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            typing_notice_interval: DEFAULT_TYPING_NOTICE_INTERVAL,
            activate_on_join: true,
        }
    }
}

impl SyncConfig {
    /// Set the typing entry lifetime.
    #[must_use]
    pub fn with_typing_ttl(mut self, ttl: Duration) -> Self {
        self.typing_ttl = ttl;
        self
    }

    /// Set the sweep period.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the typing notice throttle.
    #[must_use]
    pub fn with_typing_notice_interval(mut self, interval: Duration) -> Self {
        self.typing_notice_interval = interval;
        self
    }

    /// Set whether joins focus the room when nothing is active.
    #[must_use]
    pub fn with_activate_on_join(mut self, activate: bool) -> Self {
        self.activate_on_join = activate;
        self
    }
}
