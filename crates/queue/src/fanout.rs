//! Subscriber release after a job reaches a terminal status.
//!
//! Subscribers are detached first, so a second release of the same job finds
//! nobody to notify. That is what bounds fan-out to at most once per job.

use std::time::Duration;

use tracing::{debug, info, warn};

use shelf_core::StoreError;
use shelf_notify::{JobNotice, NotificationSink};

use crate::job::IngestionJob;
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct FanoutPolicy {
    /// Instant-candidate jobs that finish within this window of submission
    /// are released silently: the requester is still waiting on the reply.
    /// `None` disables suppression.
    pub instant_suppress: Option<Duration>,
}

impl FanoutPolicy {
    pub fn from_millis(instant_suppress_ms: u64) -> Self {
        Self {
            instant_suppress: (instant_suppress_ms > 0)
                .then(|| Duration::from_millis(instant_suppress_ms)),
        }
    }

    fn suppresses(&self, job: &IngestionJob) -> bool {
        let (Some(window), Some(turnaround)) = (self.instant_suppress, job.turnaround()) else {
            return false;
        };
        job.instant_candidate
            && turnaround
                .to_std()
                .map(|t| t <= window)
                .unwrap_or(true)
    }
}

/// What happened while releasing one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub subscribers: usize,
    pub notified: bool,
    pub suppressed: bool,
    pub deleted: bool,
}

pub fn notice_for(job: &IngestionJob) -> JobNotice {
    JobNotice {
        job_id: job.id,
        subject_url: job.subject_url.clone(),
        status: job.status.as_str().to_string(),
        result: job.result.clone(),
        message: job.failure_message().map(str::to_string),
        finished_at: job.finished_at.unwrap_or(job.updated_at),
    }
}

/// Detach the subscribers of a terminal job and notify them once.
///
/// Failed jobs are deleted right away, suppressed or not, so the next
/// submission starts a fresh attempt; successful jobs stay as a cache until
/// the reaper's retention window passes. Notification failures are
/// logged and never fail the release.
pub async fn release_subscribers(
    jobs: &dyn JobStore,
    sink: &dyn NotificationSink,
    policy: &FanoutPolicy,
    job: &IngestionJob,
) -> Result<FanoutReport, StoreError> {
    debug_assert!(job.status.is_terminal());
    let requesters = jobs.detach_subscribers(job.id).await?;
    let mut report = FanoutReport {
        subscribers: requesters.len(),
        ..FanoutReport::default()
    };

    if policy.suppresses(job) {
        report.suppressed = true;
        debug!(
            job_id = %job.id,
            subscribers = requesters.len(),
            "instant job finished inside the suppression window, notifications skipped"
        );
    } else if !requesters.is_empty() {
        let notice = notice_for(job);
        match sink.notify_requesters(&notice, &requesters).await {
            Ok(()) => {
                report.notified = true;
                info!(
                    job_id = %job.id,
                    status = %job.status,
                    subscribers = requesters.len(),
                    channel = sink.channel_name(),
                    "requesters notified"
                );
            }
            Err(e) => {
                warn!(job_id = %job.id, channel = sink.channel_name(), error = %e, "requester notification failed");
            }
        }
    }

    if job.status.is_failure() {
        report.deleted = jobs.delete(job.id).await?;
        debug!(job_id = %job.id, "failed job removed after release");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use shelf_notify::RecordingSink;

    use super::*;
    use crate::admission::enqueue_or_join;
    use crate::job::Finalization;
    use crate::store::MemoryJobStore;

    async fn finished_job(
        store: &MemoryJobStore,
        outcome: Finalization,
        elapsed_ms: i64,
    ) -> IngestionJob {
        let t0 = Utc::now();
        let url = "https://archive.example.org/works/42";
        enqueue_or_join(store, url, "alice", t0).await.unwrap();
        enqueue_or_join(store, url, "bob", t0).await.unwrap();
        let job = store.claim_next(t0).await.unwrap().unwrap();
        store
            .finalize(job.id, &outcome, t0 + ChronoDuration::milliseconds(elapsed_ms))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_notifies_every_subscriber_once() {
        let store = MemoryJobStore::new();
        let sink = RecordingSink::new();
        let job = finished_job(&store, Finalization::done(serde_json::json!({})), 5_000).await;

        let report = release_subscribers(&store, &sink, &FanoutPolicy::default(), &job)
            .await
            .unwrap();
        assert_eq!(report.subscribers, 2);
        assert!(report.notified);
        assert!(!report.deleted);

        // A second release has nobody left to notify.
        let again = release_subscribers(&store, &sink, &FanoutPolicy::default(), &job)
            .await
            .unwrap();
        assert!(!again.notified);
        assert_eq!(sink.job_notices().len(), 1);
        assert_eq!(sink.deliveries_to("alice"), 1);
        assert_eq!(sink.deliveries_to("bob"), 1);
        assert!(store.get(job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failure_is_deleted_after_release() {
        let store = MemoryJobStore::new();
        let sink = RecordingSink::new();
        let job = finished_job(&store, Finalization::error("not found"), 10).await;

        let report = release_subscribers(&store, &sink, &FanoutPolicy::default(), &job)
            .await
            .unwrap();
        assert!(report.notified);
        assert!(report.deleted);
        assert!(store.get(job.id).await.unwrap().is_none());
        let notice = &sink.job_notices()[0].notice;
        assert_eq!(notice.message.as_deref(), Some("not found"));
    }

    #[tokio::test]
    async fn test_instant_candidate_suppressed_within_window() {
        let store = MemoryJobStore::new();
        let sink = RecordingSink::new();
        let job = finished_job(&store, Finalization::done(serde_json::json!({})), 200).await;
        assert!(job.instant_candidate);

        let policy = FanoutPolicy::from_millis(1_000);
        let report = release_subscribers(&store, &sink, &policy, &job).await.unwrap();
        assert!(report.suppressed);
        assert!(sink.job_notices().is_empty());
        assert!(store.subscribers(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_suppressed_instant_failure_is_still_deleted() {
        let store = MemoryJobStore::new();
        let sink = RecordingSink::new();
        let job = finished_job(&store, Finalization::error("connection reset"), 100).await;
        assert!(job.instant_candidate);

        let policy = FanoutPolicy::from_millis(1_000);
        let report = release_subscribers(&store, &sink, &policy, &job).await.unwrap();
        assert!(report.suppressed);
        assert!(!report.notified);
        assert!(report.deleted);
        assert!(sink.job_notices().is_empty());
        assert!(store.get(job.id).await.unwrap().is_none());

        // The next request starts over instead of reading the stale failure.
        let later = Utc::now() + ChronoDuration::seconds(60);
        let again = enqueue_or_join(&store, "https://archive.example.org/works/42", "carol", later)
            .await
            .unwrap();
        assert_eq!(again.label(), "created");
    }

    #[tokio::test]
    async fn test_slow_instant_candidate_still_notifies() {
        let store = MemoryJobStore::new();
        let sink = RecordingSink::new();
        let job = finished_job(&store, Finalization::done(serde_json::json!({})), 5_000).await;

        let report = release_subscribers(&store, &sink, &FanoutPolicy::from_millis(1_000), &job)
            .await
            .unwrap();
        assert!(!report.suppressed);
        assert!(report.notified);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_fail_release() {
        let store = MemoryJobStore::new();
        let sink = RecordingSink::failing();
        let job = finished_job(&store, Finalization::done(serde_json::json!({})), 5_000).await;

        let report = release_subscribers(&store, &sink, &FanoutPolicy::default(), &job)
            .await
            .unwrap();
        assert!(!report.notified);
        assert!(store.subscribers(job.id).await.unwrap().is_empty());
    }
}
