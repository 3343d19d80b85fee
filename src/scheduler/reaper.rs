//! Expired lease reaper
//!
//! Periodically clears leases older than the configured TTL so items held by
//! a crashed worker become claimable without waiting for the next
//! supervisor epoch.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::metrics;
use crate::storage::{SharedBacklog, StoreResult};

/// Sweeps expired leases on an interval
pub struct LeaseReaper {
    store: SharedBacklog,
    ttl: Duration,
    sweep_interval: Duration,
}

impl LeaseReaper {
    pub fn new(store: SharedBacklog, ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            store,
            ttl,
            sweep_interval,
        }
    }

    /// Run one sweep, returning the number of leases reclaimed
    pub async fn sweep_once(&self) -> StoreResult<usize> {
        let reclaimed = self.store.reclaim_expired(self.ttl).await?;
        metrics::record_reclaimed(reclaimed);
        if reclaimed > 0 {
            tracing::info!(
                reclaimed = reclaimed,
                ttl_secs = self.ttl.as_secs(),
                "Reclaimed expired leases"
            );
        }
        Ok(reclaimed)
    }

    /// Spawn the sweep loop as a background task
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            tracing::warn!(error = %e, "Lease sweep failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("Lease reaper shutting down");
                        break;
                    }
                }
            }
        });

        ReaperHandle { handle, shutdown }
    }
}

/// Handle to a running reaper task
pub struct ReaperHandle {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
