//! Periodic cleanup of finished and stuck jobs.
//!
//! Runs beside the worker. It only touches terminal rows and processing rows
//! whose `updated_at` is older than the staleness window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shelf_core::config::RetentionConfig;
use shelf_core::StoreError;
use shelf_notify::NotificationSink;

use crate::fanout::{release_subscribers, FanoutPolicy};
use crate::job::Finalization;
use crate::store::JobStore;

/// Message recorded on jobs the reaper fails.
pub const STALE_JOB_MESSAGE: &str = "job timed out while processing";

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Stuck processing jobs moved to `error`.
    pub failed_stale: u64,
    /// Of those, rows deleted right after their subscribers were released.
    pub purged_stale: u64,
    /// Terminal jobs older than the retention window.
    pub purged_terminal: u64,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        *self == ReapReport::default()
    }
}

pub struct Reaper {
    jobs: Arc<dyn JobStore>,
    sink: Arc<dyn NotificationSink>,
    fanout: FanoutPolicy,
    retention: chrono::Duration,
    stale_after: chrono::Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        sink: Arc<dyn NotificationSink>,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            jobs,
            sink,
            fanout: FanoutPolicy::default(),
            retention: chrono::Duration::seconds(config.job_retention_secs as i64),
            stale_after: chrono::Duration::seconds(config.job_stale_secs as i64),
            interval: Duration::from_secs(config.reaper_interval_secs.max(1)),
        }
    }

    /// One pass: fail stuck jobs (releasing their subscribers), then purge
    /// everything terminal past retention.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<ReapReport, StoreError> {
        let mut report = ReapReport::default();

        for job in self.jobs.stale_processing(now - self.stale_after).await? {
            let failed = match self
                .jobs
                .finalize(job.id, &Finalization::error(STALE_JOB_MESSAGE), now)
                .await
            {
                Ok(failed) => failed,
                // The worker finished it between the scan and the write.
                Err(StoreError::InvalidTransition(_)) | Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            warn!(job_id = %failed.id, subject = %failed.subject_url, "stale processing job failed");
            report.failed_stale += 1;

            let released =
                release_subscribers(self.jobs.as_ref(), self.sink.as_ref(), &self.fanout, &failed)
                    .await?;
            if released.deleted {
                report.purged_stale += 1;
            }
        }

        report.purged_terminal = self.jobs.purge_terminal_before(now - self.retention).await?;
        Ok(report)
    }

    /// Sweep every interval until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "reaper started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            match self.sweep(Utc::now()).await {
                Ok(report) if report.is_empty() => debug!("reaper sweep: nothing to do"),
                Ok(report) => info!(
                    failed_stale = report.failed_stale,
                    purged_stale = report.purged_stale,
                    purged_terminal = report.purged_terminal,
                    "reaper sweep complete"
                ),
                Err(e) => warn!(error = %e, "reaper sweep failed"),
            }
        }
        info!("reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use shelf_notify::RecordingSink;

    use super::*;
    use crate::admission::enqueue_or_join;
    use crate::job::JobStatus;
    use crate::store::MemoryJobStore;

    fn retention() -> RetentionConfig {
        RetentionConfig {
            job_retention_secs: 3_600,
            job_stale_secs: 600,
            reaper_interval_secs: 60,
        }
    }

    #[tokio::test]
    async fn test_sweep_fails_stale_processing_and_notifies() {
        let store = Arc::new(MemoryJobStore::new());
        let sink = Arc::new(RecordingSink::new());
        let reaper = Reaper::new(store.clone(), sink.clone(), &retention());

        let t0 = Utc::now();
        enqueue_or_join(store.as_ref(), "https://h.org/works/1", "alice", t0).await.unwrap();
        store.claim_next(t0).await.unwrap();

        // Not stale yet.
        let report = reaper.sweep(t0 + ChronoDuration::seconds(60)).await.unwrap();
        assert!(report.is_empty());

        let report = reaper.sweep(t0 + ChronoDuration::seconds(601)).await.unwrap();
        assert_eq!(report.failed_stale, 1);
        assert_eq!(report.purged_stale, 1);
        let notices = sink.job_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].notice.message.as_deref(), Some(STALE_JOB_MESSAGE));
        assert!(store.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_purges_terminal_after_retention_only() {
        let store = Arc::new(MemoryJobStore::new());
        let sink = Arc::new(RecordingSink::new());
        let reaper = Reaper::new(store.clone(), sink.clone(), &retention());

        let t0 = Utc::now();
        let job_id = enqueue_or_join(store.as_ref(), "https://h.org/works/2", "a", t0)
            .await
            .unwrap()
            .job_id();
        store.claim_next(t0).await.unwrap();
        store
            .finalize(job_id, &Finalization::done(serde_json::json!({})), t0)
            .await
            .unwrap();
        // Pending jobs are never touched, however old.
        enqueue_or_join(store.as_ref(), "https://h.org/works/3", "a", t0).await.unwrap();

        let report = reaper.sweep(t0 + ChronoDuration::seconds(1_000)).await.unwrap();
        assert_eq!(report.purged_terminal, 0);

        let report = reaper.sweep(t0 + ChronoDuration::seconds(3_601)).await.unwrap();
        assert_eq!(report.purged_terminal, 1);
        let left = store.list(None).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].status, JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryJobStore::new());
        let sink = Arc::new(RecordingSink::new());
        let reaper = Reaper::new(store, sink, &retention());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reaper.run(rx));
        tokio::time::sleep(Duration::from_secs(130)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
