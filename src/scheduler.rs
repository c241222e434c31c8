//! Fixed-interval trigger for delivery cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::delivery::{CycleReport, DeliveryPipeline};
use crate::error::{AppError, Result};
use crate::feed::Fetcher;

pub struct Scheduler {
    fetcher: Arc<dyn Fetcher>,
    pipeline: Arc<DeliveryPipeline>,
    poll_interval: Duration,
    cycle_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        pipeline: Arc<DeliveryPipeline>,
        poll_interval: Duration,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            pipeline,
            poll_interval,
            cycle_timeout,
        }
    }

    /// Fetch, then run one delivery cycle. Storage failures propagate.
    ///
    /// The cycle timeout covers fetching and scoring. Items claimed before it
    /// expires are still delivered.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let deadline = Instant::now() + self.cycle_timeout;
        let items = timeout_at(deadline, self.fetcher.fetch())
            .await
            .map_err(|_| AppError::CycleTimeout)??;
        self.pipeline.run_cycle(items, deadline).await
    }

    /// Runs one cycle. Failures are logged; the next tick starts fresh.
    pub async fn tick(&self) -> Option<CycleReport> {
        match self.run_once().await {
            Ok(report) => {
                info!(
                    received = report.received,
                    sent = report.broadcasts.len(),
                    rejected = report.rejected,
                    skipped = report.scoring_skipped,
                    undelivered = report.undelivered.len(),
                    "cycle complete"
                );
                Some(report)
            }
            Err(AppError::CycleTimeout) => {
                warn!(timeout = ?self.cycle_timeout, "cycle timed out and was abandoned");
                None
            }
            Err(e) if e.is_storage() => {
                error!(error = %e, "storage unavailable, cycle aborted");
                None
            }
            Err(e) => {
                error!(error = %e, "cycle failed, retrying on next tick");
                None
            }
        }
    }

    /// Ticks until the shutdown flag flips to true. The first cycle starts
    /// immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.poll_interval, "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("scheduler received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }
}
