//! Job storage backends.
//!
//! [`JobStore`] is implemented in memory ([`MemoryJobStore`]) and on
//! PostgreSQL ([`PgJobStore`]). Both enforce one row per subject URL and
//! report a duplicate insert as [`StoreError::Conflict`].

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shelf_core::StoreError;

use crate::job::{Finalization, IngestionJob, JobStatus, NewJob};

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job and register its requester as first subscriber.
    ///
    /// `instant_candidate` is decided inside the same write: true only when
    /// no non-terminal job exists. A second row for the same URL fails
    /// with [`StoreError::Conflict`].
    async fn insert(&self, new: NewJob) -> Result<IngestionJob, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<IngestionJob>, StoreError>;

    async fn get_by_url(&self, subject_url: &str) -> Result<Option<IngestionJob>, StoreError>;

    /// Jobs ordered by submission (oldest first), optionally filtered.
    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<IngestionJob>, StoreError>;

    /// Subscribe `requester` if the job is still pending or processing.
    ///
    /// Returns false (and changes nothing) when the job is terminal or gone.
    async fn add_subscriber_if_active(
        &self,
        job_id: Uuid,
        requester: &str,
    ) -> Result<bool, StoreError>;

    async fn subscribers(&self, job_id: Uuid) -> Result<Vec<String>, StoreError>;

    /// Remove and return every subscriber of the job.
    async fn detach_subscribers(&self, job_id: Uuid) -> Result<Vec<String>, StoreError>;

    /// Move the oldest pending job to processing.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<IngestionJob>, StoreError>;

    /// Terminal write. Only a processing job can be finalized.
    async fn finalize(
        &self,
        job_id: Uuid,
        outcome: &Finalization,
        now: DateTime<Utc>,
    ) -> Result<IngestionJob, StoreError>;

    /// Returns whether a row was removed.
    async fn delete(&self, job_id: Uuid) -> Result<bool, StoreError>;

    /// Delete terminal jobs that finished before `cutoff`.
    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Processing jobs whose last update is older than `cutoff`.
    async fn stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IngestionJob>, StoreError>;

    /// Operator reset: move processing (and optionally error) jobs back to pending.
    async fn reset_to_pending(
        &self,
        include_errors: bool,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}
