use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::{SyncConfig, SyncError, Synchronizer};

/// Scheduler that runs `synchronizer` on `cron`. Ticks that land while a run is
/// still going are skipped.
pub async fn build_scheduler(synchronizer: Arc<Synchronizer>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let synchronizer = Arc::clone(&synchronizer);
        Box::pin(async move {
            match synchronizer.run().await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    mode = ?summary.mode,
                    writes = summary.writes(),
                    "scheduled sync finished"
                ),
                Err(SyncError::AlreadyRunning) => {
                    warn!("previous sync still running, skipping tick")
                }
                Err(err) => error!(error = %err, "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    synchronizer: Arc<Synchronizer>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(synchronizer, &config.sync_cron).await.map(Some)
}

#[cfg(test)]
mod tests {
    use tlsync_snapshot::MemorySnapshotRepository;
    use tlsync_storage::MemoryStore;

    use super::*;
    use crate::SyncOptions;

    fn synchronizer() -> Arc<Synchronizer> {
        Arc::new(Synchronizer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySnapshotRepository::new()),
            SyncOptions::default(),
        ))
    }

    #[tokio::test]
    async fn disabled_scheduler_is_not_built() {
        let mut config = SyncConfig::from_env();
        config.scheduler_enabled = false;
        assert!(maybe_build_scheduler(&config, synchronizer())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_cron_is_rejected() {
        assert!(build_scheduler(synchronizer(), "not a cron").await.is_err());
    }
}
