//! Background batch-settlement loop.
//!
//! Wakes on a fixed interval and settles every pending session whose
//! `settling` flag is down and whose receipt list is non-empty. Sessions
//! drained to zero receipts leave the pending set; drained and expired
//! sessions are evicted from the store. On shutdown the loop stops taking
//! new work; an in-flight settle runs to its natural conclusion.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::facilitator::OdpDeferredFacilitator;

/// The scheduled settlement driver.
pub struct AutoSettler {
    facilitator: Arc<OdpDeferredFacilitator>,
    interval: Duration,
}

impl AutoSettler {
    pub fn new(facilitator: Arc<OdpDeferredFacilitator>, interval: Duration) -> Self {
        Self {
            facilitator,
            interval,
        }
    }

    /// Spawns the loop; it terminates when `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so a fresh start
            // does not settle before any receipt lands.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("settlement scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.facilitator.settle_pending().await;
                    }
                }
            }
        })
    }
}
