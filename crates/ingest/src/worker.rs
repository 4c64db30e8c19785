//! The single-flight ingestion worker.
//!
//! One job at a time: claim the oldest pending job, fetch under the
//! [`RateBudget`], gate, merge, finalize, release subscribers, then sleep the
//! inter-job delay. Anything that goes wrong inside a job, including a
//! panic, ends that job as `error` and the loop carries on.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

use shelf_catalog::{EligibilityGate, MergeEngine, Verdict};
use shelf_core::config::IngestConfig;
use shelf_core::{StoreError, Subject, SubjectKind, Tier, WorkField, WorkMetadata, WorkRecord};
use shelf_notify::{ModerationNotice, ModerationSink, NotificationSink};
use shelf_queue::{release_subscribers, FanoutPolicy, Finalization, IngestionJob, JobStore};

use crate::error::IngestError;
use crate::fetcher::{FetchError, Fetcher};
use crate::pacing::{Pacer, RateBudget};

// ── Settings ─────────────────────────────────────────────────────────

/// When a series job as a whole is rejected for member ineligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesRejectionPolicy {
    /// Only when every attempted member was rejected.
    #[default]
    AllMembers,
    /// As soon as one member is rejected.
    AnyMember,
    /// Never; rejected members are recorded and skipped.
    Never,
}

impl SeriesRejectionPolicy {
    pub fn rejects(&self, attempted: usize, rejected: usize) -> bool {
        match self {
            SeriesRejectionPolicy::AllMembers => attempted > 0 && rejected == attempted,
            SeriesRejectionPolicy::AnyMember => rejected > 0,
            SeriesRejectionPolicy::Never => false,
        }
    }
}

impl FromStr for SeriesRejectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "all-members" => Ok(Self::AllMembers),
            "any-member" => Ok(Self::AnyMember),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown series rejection policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub series_member_limit: usize,
    pub series_rejection: SeriesRejectionPolicy,
    pub fanout: FanoutPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &IngestConfig) -> Result<Self, String> {
        Ok(Self {
            series_member_limit: config.series_member_limit,
            series_rejection: config.series_rejection.parse()?,
            fanout: FanoutPolicy::from_millis(config.instant_suppress_ms),
        })
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            series_member_limit: 5,
            series_rejection: SeriesRejectionPolicy::default(),
            fanout: FanoutPolicy::default(),
        }
    }
}

/// Everything the worker talks to.
#[derive(Clone)]
pub struct WorkerDeps {
    pub jobs: Arc<dyn JobStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub gate: Arc<EligibilityGate>,
    pub merge: Arc<MergeEngine>,
    pub notifier: Arc<dyn NotificationSink>,
    pub moderation: Arc<dyn ModerationSink>,
}

// ── Worker ───────────────────────────────────────────────────────────

pub struct IngestWorker {
    pub(crate) deps: WorkerDeps,
    pub(crate) settings: WorkerSettings,
    budget: Arc<RateBudget>,
    pacer: Pacer,
}

impl IngestWorker {
    pub fn new(
        deps: WorkerDeps,
        settings: WorkerSettings,
        budget: Arc<RateBudget>,
        pacer: Pacer,
    ) -> Self {
        Self { deps, settings, budget, pacer }
    }

    /// Claim and fully process one job. `Ok(None)` means the queue was empty.
    pub async fn process_next(&mut self) -> Result<Option<IngestionJob>, StoreError> {
        let Some(job) = self.deps.jobs.claim_next(Utc::now()).await? else {
            return Ok(None);
        };
        info!(
            job_id = %job.id,
            subject = %job.subject_url,
            batch_kind = job.batch_kind.as_str(),
            "job claimed"
        );

        let outcome = match AssertUnwindSafe(self.execute(&job)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic);
                error!(job_id = %job.id, panic = %message, "job panicked");
                Finalization::error(format!("unexpected failure: {message}"))
            }
        };

        let finished = match self.deps.jobs.finalize(job.id, &outcome, Utc::now()).await {
            Ok(finished) => finished,
            // Reset or reaped while we were working on it.
            Err(StoreError::InvalidTransition(msg)) | Err(StoreError::NotFound(msg)) => {
                warn!(job_id = %job.id, reason = %msg, "job changed under the worker, outcome dropped");
                return Ok(Some(job));
            }
            Err(e) => return Err(e),
        };
        info!(job_id = %finished.id, status = %finished.status, "job finished");

        release_subscribers(
            self.deps.jobs.as_ref(),
            self.deps.notifier.as_ref(),
            &self.settings.fanout,
            &finished,
        )
        .await?;
        Ok(Some(finished))
    }

    async fn execute(&mut self, job: &IngestionJob) -> Finalization {
        let result = match Subject::parse(&job.subject_url) {
            Ok(subject) => match subject.kind() {
                SubjectKind::Work => self.ingest_work(job, &subject).await,
                SubjectKind::Series => self.ingest_series(job, &subject).await,
            },
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(outcome) => outcome,
            Err(IngestError::Fetch(e)) => {
                warn!(job_id = %job.id, kind = e.kind(), error = %e, "fetch failed");
                Finalization::error(e.to_string())
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "job failed");
                Finalization::error(e.to_string())
            }
        }
    }

    async fn ingest_work(
        &mut self,
        job: &IngestionJob,
        subject: &Subject,
    ) -> Result<Finalization, IngestError> {
        let meta = self.fetch_work(&subject.url).await?;

        let verdict = self.deps.gate.check(&subject.key, &meta.facets).await?;
        if let Verdict::Rejected { reason } = &verdict {
            self.report_rejection(job, reason).await;
            return Ok(Finalization::rejected(reason.clone()));
        }

        let now = Utc::now();
        let candidate = WorkRecord::from_metadata(&subject.url, meta, now);
        let outcome = self
            .deps
            .merge
            .merge_work(candidate, &WorkField::METADATA, Tier::AUTOMATED, now)
            .await?;

        Ok(Finalization::done(json!({
            "kind": "work",
            "work_id": outcome.record.external_id,
            "title": outcome.record.title,
            "authors": outcome.record.authors,
            "action": outcome.action,
            "updated_fields": outcome.applied,
            "blocked_fields": outcome.blocked,
            "verdict": verdict,
        })))
    }

    /// Paced fetch of one work page.
    pub(crate) async fn fetch_work(&mut self, url: &str) -> Result<WorkMetadata, FetchError> {
        self.budget.wait(1).await;
        tokio::time::sleep(self.pacer.think_time()).await;
        Ok(self.deps.fetcher.fetch_work(url).await?.normalized())
    }

    pub(crate) async fn pace_series_page(&mut self) {
        self.budget.wait(1).await;
        tokio::time::sleep(self.pacer.think_time()).await;
    }

    pub(crate) async fn report_rejection(&self, job: &IngestionJob, reason: &str) {
        info!(job_id = %job.id, subject = %job.subject_url, reason, "subject rejected by eligibility policy");
        let notice = ModerationNotice {
            subject_url: job.subject_url.clone(),
            reason: reason.to_string(),
            requester: job.requested_by.first().cloned(),
            detected_at: Utc::now(),
        };
        if let Err(e) = self.deps.moderation.notify_moderation(&notice).await {
            warn!(
                job_id = %job.id,
                channel = self.deps.moderation.channel_name(),
                error = %e,
                "moderation notification failed"
            );
        }
    }

    /// Drain the queue until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.budget.interval().as_millis() as u64,
            member_limit = self.settings.series_member_limit,
            "ingest worker started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.process_next().await {
                Ok(Some(_)) => {
                    let next = self.pacer.after_job();
                    if next.long_pause {
                        info!(pause_secs = next.delay.as_secs(), "taking a long pause");
                    }
                    next.delay
                }
                Ok(None) => self.pacer.idle(),
                Err(e) => {
                    error!(error = %e, "job store error in worker loop");
                    self.pacer.idle()
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("ingest worker stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_rejection_policy() {
        assert!(SeriesRejectionPolicy::AllMembers.rejects(3, 3));
        assert!(!SeriesRejectionPolicy::AllMembers.rejects(3, 2));
        assert!(!SeriesRejectionPolicy::AllMembers.rejects(0, 0));
        assert!(SeriesRejectionPolicy::AnyMember.rejects(3, 1));
        assert!(!SeriesRejectionPolicy::Never.rejects(3, 3));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = IngestConfig {
            series_member_limit: 3,
            series_rejection: "any-member".into(),
            instant_suppress_ms: 1_500,
            fetcher_url: "http://localhost:8088".into(),
            fetcher_timeout_secs: 5,
        };
        let settings = WorkerSettings::from_config(&config).unwrap();
        assert_eq!(settings.series_member_limit, 3);
        assert_eq!(settings.series_rejection, SeriesRejectionPolicy::AnyMember);
        assert!(settings.fanout.instant_suppress.is_some());

        config.series_rejection = "sometimes".into();
        assert!(WorkerSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
