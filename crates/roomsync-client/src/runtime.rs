//! Signal loop driving a coordinator.
//!
//! The [`Runtime`] consumes transport signals and ticks the typing sweep on
//! its own timer. Push delivery, reconnect resync and expiry all flow through
//! the same [`SyncCoordinator`], so production and simulation share one loop.

use std::{sync::Arc, time::Duration};

use roomsync_core::Environment;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{Account, Hub, HubSignal, SyncCoordinator};

/// Event loop feeding transport signals and sweep ticks to a coordinator.
pub struct Runtime<H, A, E>
where
    H: Hub,
    A: Account,
    E: Environment,
{
    coordinator: Arc<SyncCoordinator<H, A, E>>,
}

impl<H, A, E> Runtime<H, A, E>
where
    H: Hub,
    A: Account,
    E: Environment,
{
    /// Runtime for a shared coordinator. Commands may be issued on other
    /// handles of the same coordinator while the loop runs.
    pub fn new(coordinator: Arc<SyncCoordinator<H, A, E>>) -> Self {
        Self { coordinator }
    }

    /// The driven coordinator.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator<H, A, E>> {
        &self.coordinator
    }

    /// Run until the signal channel closes.
    ///
    /// `Reconnected` triggers a resync; a failed resync is logged and the loop
    /// keeps going. The sweep fires every `sweep_interval` measured from the
    /// previous sweep, however busy the signal channel is.
    pub async fn run(self, mut signals: mpsc::Receiver<HubSignal>) {
        let env = self.coordinator.env().clone();
        let interval = self.coordinator.config().sweep_interval;
        let mut next_sweep = env.now() + interval;

        loop {
            let now = env.now();
            let wait = if next_sweep > now { next_sweep - now } else { Duration::ZERO };

            tokio::select! {
                signal = signals.recv() => {
                    let Some(signal) = signal else {
                        break;
                    };
                    if let Err(err) = self.coordinator.handle_signal(signal).await {
                        warn!(error = %err, "resync failed, state may be stale");
                    }
                },
                () = env.sleep(wait) => {
                    self.coordinator.sweep_typing().await;
                    next_sweep = env.now() + interval;
                },
            }
        }

        info!("signal channel closed, runtime stopped");
    }
}
