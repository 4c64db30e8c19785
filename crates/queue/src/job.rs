//! The ingestion job model and its lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shelf_core::{StoreError, Subject, SubjectKind};

// ── Status ───────────────────────────────────────────────────────────

/// `pending → processing → {done | series-done | error | rejected}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    SeriesDone,
    Error,
    Rejected,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Done,
        JobStatus::SeriesDone,
        JobStatus::Error,
        JobStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::SeriesDone => "series-done",
            JobStatus::Error => "error",
            JobStatus::Rejected => "rejected",
        }
    }

    /// No worker transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::SeriesDone)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Rejected)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| StoreError::Serialize(format!("unknown job status '{s}'")))
    }
}

/// Whether the job ingests one work or a whole series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Single,
    Series,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Single => "single",
            BatchKind::Series => "series",
        }
    }

    pub fn for_subject(subject: &Subject) -> Self {
        match subject.kind() {
            SubjectKind::Work => BatchKind::Single,
            SubjectKind::Series => BatchKind::Series,
        }
    }
}

impl FromStr for BatchKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(BatchKind::Single),
            "series" => Ok(BatchKind::Series),
            other => Err(StoreError::Serialize(format!("unknown batch kind '{other}'"))),
        }
    }
}

// ── Job ──────────────────────────────────────────────────────────────

/// One row per distinct subject URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub subject_url: String,
    pub status: JobStatus,
    pub batch_kind: BatchKind,
    /// Every requester that ever created or joined the job, in arrival order.
    pub requested_by: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    /// Last status change; staleness is measured from here.
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// True only if no other job was in flight when this one was created.
    pub instant_candidate: bool,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub rejection_reason: Option<String>,
}

impl IngestionJob {
    /// Error or rejection text for failed jobs.
    pub fn failure_message(&self) -> Option<&str> {
        self.rejection_reason
            .as_deref()
            .or(self.error_message.as_deref())
    }

    /// Time from submission to the terminal transition.
    pub fn turnaround(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|f| f - self.submitted_at)
    }
}

/// Input for [`crate::JobStore::insert`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub subject_url: String,
    pub batch_kind: BatchKind,
    pub requester: String,
    pub submitted_at: DateTime<Utc>,
}

impl NewJob {
    pub fn for_subject(subject: &Subject, requester: &str, now: DateTime<Utc>) -> Self {
        Self {
            subject_url: subject.url.clone(),
            batch_kind: BatchKind::for_subject(subject),
            requester: requester.to_string(),
            submitted_at: now,
        }
    }

    /// The pending row this input becomes.
    pub fn into_job(self, instant_candidate: bool) -> IngestionJob {
        IngestionJob {
            id: Uuid::new_v4(),
            subject_url: self.subject_url,
            status: JobStatus::Pending,
            batch_kind: self.batch_kind,
            requested_by: vec![self.requester],
            submitted_at: self.submitted_at,
            updated_at: self.submitted_at,
            finished_at: None,
            instant_candidate,
            result: None,
            error_message: None,
            rejection_reason: None,
        }
    }
}

// ── Finalization ─────────────────────────────────────────────────────

/// The terminal write the worker (or reaper) makes to a processing job.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalization {
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub rejection_reason: Option<String>,
}

impl Finalization {
    pub fn done(result: serde_json::Value) -> Self {
        Self {
            status: JobStatus::Done,
            result: Some(result),
            error_message: None,
            rejection_reason: None,
        }
    }

    pub fn series_done(result: serde_json::Value) -> Self {
        Self {
            status: JobStatus::SeriesDone,
            ..Self::done(result)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Error,
            result: None,
            error_message: Some(message.into()),
            rejection_reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Rejected,
            result: None,
            error_message: None,
            rejection_reason: Some(reason.into()),
        }
    }

    /// Write this outcome onto a job row.
    pub fn apply_to(&self, job: &mut IngestionJob, now: DateTime<Utc>) {
        job.status = self.status;
        job.result = self.result.clone();
        job.error_message = self.error_message.clone();
        job.rejection_reason = self.rejection_reason.clone();
        job.updated_at = now;
        job.finished_at = Some(now);
    }
}
