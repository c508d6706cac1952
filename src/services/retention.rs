use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use crate::services::job_store::JobStore;

const SWEEP_INTERVAL_SECS: u64 = 6 * 3600;

/// Purges terminal migration jobs once they age past the retention window.
/// Jobs inside the window are the audit record of a run and are never touched.
pub struct RetentionSweeper {
    jobs: Arc<dyn JobStore>,
    retention_days: i64,
}

impl RetentionSweeper {
    pub fn new(jobs: Arc<dyn JobStore>, retention_days: u32) -> Self {
        Self {
            jobs,
            retention_days: i64::from(retention_days),
        }
    }

    pub async fn start(self) {
        tracing::info!(
            "Starting migration job retention sweeper (retention {} days)",
            self.retention_days
        );

        let mut tick = interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = self.sweep().await {
                tracing::error!("Retention sweep failed: {}", e);
            }
        }
    }

    async fn sweep(&self) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days);
        let deleted = self.jobs.delete_terminal_created_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!("Purged {} migration job(s) past retention", deleted);
        } else {
            tracing::debug!("Retention sweep found nothing to purge");
        }
        Ok(())
    }
}
