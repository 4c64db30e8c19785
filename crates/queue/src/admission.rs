//! Enqueue-or-join admission.
//!
//! The store's uniqueness constraint on `subject_url` is the arbitration
//! point: we always try the insert first and react to the conflict, never
//! check-then-insert.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use shelf_core::{StoreError, Subject};

use crate::error::QueueError;
use crate::job::{IngestionJob, JobStatus, NewJob};
use crate::store::JobStore;

/// Lookups after a conflict can race with the reaper or immediate cleanup
/// deleting the row; retry the whole admission a bounded number of times.
const MAX_ADMISSION_ATTEMPTS: u32 = 3;

/// What the requester gets back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Admission {
    /// A new pending job; the requester is its first subscriber.
    Created { job: IngestionJob },
    /// The subject is already queued or in flight; the requester now subscribes to it.
    JoinedProcessing { job_id: Uuid, job_status: JobStatus },
    /// The subject was ingested recently; use the stored result.
    Cached {
        job_id: Uuid,
        job_status: JobStatus,
        result: Option<serde_json::Value>,
    },
    /// The last attempt failed; the stored error or rejection text.
    CachedFailure {
        job_id: Uuid,
        job_status: JobStatus,
        message: String,
    },
}

impl Admission {
    pub fn job_id(&self) -> Uuid {
        match self {
            Admission::Created { job } => job.id,
            Admission::JoinedProcessing { job_id, .. }
            | Admission::Cached { job_id, .. }
            | Admission::CachedFailure { job_id, .. } => *job_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Admission::Created { .. } => "created",
            Admission::JoinedProcessing { .. } => "joined-processing",
            Admission::Cached { .. } => "cached",
            Admission::CachedFailure { .. } => "cached-failure",
        }
    }
}

/// Admit `raw_url` for `requester`: create a job, join the in-flight one,
/// or answer from the terminal one already stored.
pub async fn enqueue_or_join(
    store: &dyn JobStore,
    raw_url: &str,
    requester: &str,
    now: DateTime<Utc>,
) -> Result<Admission, QueueError> {
    let subject = Subject::parse(raw_url)?;

    for attempt in 1..=MAX_ADMISSION_ATTEMPTS {
        match store.insert(NewJob::for_subject(&subject, requester, now)).await {
            Ok(job) => {
                info!(
                    job_id = %job.id,
                    subject = %job.subject_url,
                    requester,
                    instant_candidate = job.instant_candidate,
                    "ingestion job created"
                );
                return Ok(Admission::Created { job });
            }
            Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let Some(existing) = store.get_by_url(&subject.url).await? else {
            debug!(subject = %subject.url, attempt, "conflicting job vanished, retrying admission");
            continue;
        };

        if !existing.status.is_terminal() {
            if store.add_subscriber_if_active(existing.id, requester).await? {
                info!(
                    job_id = %existing.id,
                    subject = %existing.subject_url,
                    requester,
                    "requester joined in-flight job"
                );
                return Ok(Admission::JoinedProcessing {
                    job_id: existing.id,
                    job_status: existing.status,
                });
            }
            // Finalized between the lookup and the join; re-read it.
            debug!(job_id = %existing.id, attempt, "job finished while joining, retrying admission");
            continue;
        }

        return Ok(cached_answer(existing));
    }

    Err(QueueError::Contention(subject.url, MAX_ADMISSION_ATTEMPTS))
}

fn cached_answer(job: IngestionJob) -> Admission {
    if job.status.is_success() {
        debug!(job_id = %job.id, "serving cached result");
        Admission::Cached {
            job_id: job.id,
            job_status: job.status,
            result: job.result,
        }
    } else {
        let message = job
            .failure_message()
            .unwrap_or("ingestion failed")
            .to_string();
        Admission::CachedFailure {
            job_id: job.id,
            job_status: job.status,
            message,
        }
    }
}
