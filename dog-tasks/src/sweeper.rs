use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::{QueueResult, QueueService};

/// Periodically hands back tasks held by workers that stopped heartbeating.
///
/// Opt-in: nothing reclaims abandoned tasks unless one of these is running.
pub struct VisibilitySweeper {
    queue: Arc<QueueService>,
    interval: Duration,
}

impl VisibilitySweeper {
    /// Sweep at half the visibility timeout
    pub fn new(queue: Arc<QueueService>) -> Self {
        let interval = (queue.config().visibility_timeout / 2).max(Duration::from_millis(100));
        Self { queue, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Run forever
    pub async fn start(self) -> QueueResult<()> {
        let mut ticker = interval(self.interval);

        info!("Starting visibility sweeper with interval: {:?}", self.interval);

        loop {
            ticker.tick().await;

            match self.sweep_once().await {
                Ok(0) => debug!("No abandoned tasks found"),
                Ok(reclaimed) => info!("Reclaimed {} abandoned tasks", reclaimed),
                Err(e) => warn!("Error during visibility sweep: {}", e),
            }
        }
    }

    /// One sweep cycle
    pub async fn sweep_once(&self) -> QueueResult<usize> {
        let reclaimed = self.queue.reclaim_stale().await?;
        let purged = self.queue.purge_expired_results().await?;
        if purged > 0 {
            debug!("Purged {} expired results", purged);
        }
        Ok(reclaimed.len())
    }

    /// Run on the current runtime; abort the handle to stop
    pub fn spawn(self) -> JoinHandle<QueueResult<()>> {
        tokio::spawn(self.start())
    }
}
