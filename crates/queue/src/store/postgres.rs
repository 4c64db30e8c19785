//! PostgreSQL job store over the `ingestion_jobs` / `ingestion_subscribers`
//! tables.
//!
//! Admission arbitration is the `subject_url` unique constraint: a duplicate
//! insert surfaces as SQLSTATE 23505 and is mapped to
//! [`StoreError::Conflict`]. Claiming uses `FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use shelf_core::StoreError;

use super::JobStore;
use crate::job::{Finalization, IngestionJob, JobStatus, NewJob};

const JOB_COLUMNS: &str = "id, subject_url, status, batch_kind, requested_by, submitted_at, \
     updated_at, finished_at, instant_candidate, result, error_message, rejection_reason";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    subject_url: String,
    status: String,
    batch_kind: String,
    requested_by: Vec<String>,
    submitted_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    instant_candidate: bool,
    result: Option<serde_json::Value>,
    error_message: Option<String>,
    rejection_reason: Option<String>,
}

impl TryFrom<JobRow> for IngestionJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(IngestionJob {
            id: row.id,
            subject_url: row.subject_url,
            status: row.status.parse()?,
            batch_kind: row.batch_kind.parse()?,
            requested_by: row.requested_by,
            submitted_at: row.submitted_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
            instant_candidate: row.instant_candidate,
            result: row.result,
            error_message: row.error_message,
            rejection_reason: row.rejection_reason,
        })
    }
}

/// Job store backed by a shared [`PgPool`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_opt(
        &self,
        sql: &str,
        id: Uuid,
    ) -> Result<Option<IngestionJob>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.map(IngestionJob::try_from).transpose()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, new: NewJob) -> Result<IngestionJob, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let sql = format!(
            "INSERT INTO ingestion_jobs
                 (id, subject_url, status, batch_kind, requested_by, submitted_at, updated_at,
                  instant_candidate)
             VALUES ($1, $2, 'pending', $3, ARRAY[$4]::TEXT[], $5, $5,
                     NOT EXISTS (SELECT 1 FROM ingestion_jobs
                                 WHERE status IN ('pending', 'processing')))
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.subject_url)
            .bind(new.batch_kind.as_str())
            .bind(&new.requester)
            .bind(new.submitted_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_unique_violation(e, &new.subject_url))?;

        sqlx::query("INSERT INTO ingestion_subscribers (job_id, requester_id) VALUES ($1, $2)")
            .bind(row.id)
            .bind(&new.requester)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<IngestionJob>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = $1");
        self.fetch_one_opt(&sql, id).await
    }

    async fn get_by_url(&self, subject_url: &str) -> Result<Option<IngestionJob>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE subject_url = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(subject_url)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.map(IngestionJob::try_from).transpose()
    }

    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<IngestionJob>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs
             WHERE ($1::TEXT IS NULL OR status = $1)
             ORDER BY submitted_at"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(IngestionJob::try_from).collect()
    }

    async fn add_subscriber_if_active(
        &self,
        job_id: Uuid,
        requester: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Row lock serializes the join against finalize().
        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM ingestion_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let active = match status {
            Some(s) => !s.parse::<JobStatus>()?.is_terminal(),
            None => false,
        };
        if !active {
            tx.rollback().await.map_err(db_error)?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO ingestion_subscribers (job_id, requester_id) VALUES ($1, $2)
             ON CONFLICT (job_id, requester_id) DO NOTHING",
        )
        .bind(job_id)
        .bind(requester)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query(
            "UPDATE ingestion_jobs
             SET requested_by = CASE WHEN $2 = ANY(requested_by) THEN requested_by
                                     ELSE array_append(requested_by, $2) END
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(requester)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn subscribers(&self, job_id: Uuid) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            "SELECT requester_id FROM ingestion_subscribers
             WHERE job_id = $1 ORDER BY created_at, requester_id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn detach_subscribers(&self, job_id: Uuid) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>(
            "DELETE FROM ingestion_subscribers WHERE job_id = $1 RETURNING requester_id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<IngestionJob>, StoreError> {
        let sql = format!(
            "UPDATE ingestion_jobs SET status = 'processing', updated_at = $1
             WHERE id = (
                 SELECT id FROM ingestion_jobs
                 WHERE status = 'pending'
                 ORDER BY submitted_at
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.map(IngestionJob::try_from).transpose()
    }

    async fn finalize(
        &self,
        job_id: Uuid,
        outcome: &Finalization,
        now: DateTime<Utc>,
    ) -> Result<IngestionJob, StoreError> {
        let sql = format!(
            "UPDATE ingestion_jobs
             SET status = $2, result = $3, error_message = $4, rejection_reason = $5,
                 updated_at = $6, finished_at = $6
             WHERE id = $1 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .bind(outcome.status.as_str())
            .bind(&outcome.result)
            .bind(&outcome.error_message)
            .bind(&outcome.rejection_reason)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => row.try_into(),
            None => match self.get(job_id).await? {
                Some(job) => Err(StoreError::InvalidTransition(format!(
                    "job {job_id} is {}, cannot become {}",
                    job.status, outcome.status
                ))),
                None => Err(StoreError::NotFound(format!("ingestion job {job_id}"))),
            },
        }
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM ingestion_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM ingestion_jobs
             WHERE status IN ('done', 'series-done', 'error', 'rejected')
               AND COALESCE(finished_at, updated_at) < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IngestionJob>, StoreError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs
             WHERE status = 'processing' AND updated_at < $1
             ORDER BY updated_at"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(IngestionJob::try_from).collect()
    }

    async fn reset_to_pending(
        &self,
        include_errors: bool,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs
             SET status = 'pending', updated_at = $2, finished_at = NULL, error_message = NULL
             WHERE status = 'processing' OR ($1 AND status = 'error')",
        )
        .bind(include_errors)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Map a PostgreSQL unique violation (23505) to [`StoreError::Conflict`].
fn map_unique_violation(e: sqlx::Error, subject_url: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(format!("ingestion job for {subject_url} already exists"));
        }
    }
    db_error(e)
}

fn db_error(e: sqlx::Error) -> StoreError {
    error!("job store database error: {}", e);
    StoreError::Database(e.to_string())
}
