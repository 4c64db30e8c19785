//! PostgreSQL catalog, lock and override stores.
//!
//! Records live as JSONB in `works` / `series`; the external id carries the
//! unique constraint. Patches are applied under `SELECT ... FOR UPDATE` so
//! concurrent merges of one work serialize.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::error;

use shelf_core::{SeriesRecord, StoreError, SubjectKey, Tier, WorkRecord};

use super::{CatalogStore, LockStore, OverrideStore};
use crate::eligibility::Override;
use crate::locks::{FieldLock, GlobalLockPolicy};
use crate::merge::WorkPatch;

// ── Records ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn work_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<WorkRecord>, StoreError> {
        let row: Option<(Json<WorkRecord>,)> =
            sqlx::query_as("SELECT record FROM works WHERE external_id = $1")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(|(Json(record),)| record))
    }

    async fn insert_work(&self, record: &WorkRecord) -> Result<WorkRecord, StoreError> {
        sqlx::query(
            "INSERT INTO works (id, external_id, url, record, created_at, last_merged_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id)
        .bind(&record.external_id)
        .bind(&record.url)
        .bind(Json(record))
        .bind(record.created_at)
        .bind(record.last_merged_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &format!("work {}", record.external_id)))?;
        Ok(record.clone())
    }

    async fn apply_work_patch(
        &self,
        external_id: &str,
        patch: &WorkPatch,
        now: DateTime<Utc>,
    ) -> Result<WorkRecord, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row: Option<(Json<WorkRecord>,)> =
            sqlx::query_as("SELECT record FROM works WHERE external_id = $1 FOR UPDATE")
                .bind(external_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
        let Some((Json(mut record),)) = row else {
            return Err(StoreError::NotFound(format!("work {external_id}")));
        };

        patch.apply(&mut record);
        record.last_merged_at = now;

        sqlx::query("UPDATE works SET record = $2, last_merged_at = $3 WHERE external_id = $1")
            .bind(external_id)
            .bind(Json(&record))
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(record)
    }

    async fn list_works(&self) -> Result<Vec<WorkRecord>, StoreError> {
        let rows: Vec<(Json<WorkRecord>,)> =
            sqlx::query_as("SELECT record FROM works ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(rows.into_iter().map(|(Json(r),)| r).collect())
    }

    async fn series_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<SeriesRecord>, StoreError> {
        let row: Option<(Json<SeriesRecord>,)> =
            sqlx::query_as("SELECT record FROM series WHERE external_id = $1")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(|(Json(record),)| record))
    }

    async fn upsert_series(&self, record: &SeriesRecord) -> Result<SeriesRecord, StoreError> {
        let row: (Json<SeriesRecord>,) = sqlx::query_as(
            "INSERT INTO series (id, external_id, url, record, created_at, last_merged_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (external_id) DO UPDATE
                 SET url = EXCLUDED.url,
                     record = EXCLUDED.record,
                     last_merged_at = EXCLUDED.last_merged_at
             RETURNING record",
        )
        .bind(record.id)
        .bind(&record.external_id)
        .bind(&record.url)
        .bind(Json(record))
        .bind(record.created_at)
        .bind(record.last_merged_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.0 .0)
    }
}

// ── Locks ────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct LockRow {
    subject_key: String,
    field_name: String,
    locked: bool,
    tier: String,
    actor_id: String,
    at: DateTime<Utc>,
}

impl TryFrom<LockRow> for FieldLock {
    type Error = StoreError;

    fn try_from(row: LockRow) -> Result<Self, Self::Error> {
        Ok(FieldLock {
            subject: parse_subject(&row.subject_key)?,
            field: row.field_name,
            locked: row.locked,
            tier: parse_tier(&row.tier)?,
            actor_id: row.actor_id,
            at: row.at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PolicyRow {
    fields: Vec<String>,
    automated_respects_global: bool,
    updated_by: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn record_lock_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &FieldLock,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO field_lock_events (subject_key, field_name, locked, tier, actor_id, at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(event.subject.storage_key())
    .bind(&event.field)
    .bind(event.locked)
    .bind(event.tier.as_str())
    .bind(&event.actor_id)
    .bind(event.at)
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;
    Ok(())
}

#[async_trait]
impl LockStore for PgLockStore {
    async fn active_locks(&self, subject: &SubjectKey) -> Result<Vec<FieldLock>, StoreError> {
        let rows = sqlx::query_as::<_, LockRow>(
            "SELECT subject_key, field_name, true AS locked, tier, actor_id, locked_at AS at
             FROM field_locks WHERE subject_key = $1 ORDER BY field_name",
        )
        .bind(subject.storage_key())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(FieldLock::try_from).collect()
    }

    async fn put_lock(&self, lock: &FieldLock) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query(
            "INSERT INTO field_locks (subject_key, field_name, tier, actor_id, locked_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (subject_key, field_name) DO UPDATE
                 SET tier = EXCLUDED.tier,
                     actor_id = EXCLUDED.actor_id,
                     locked_at = EXCLUDED.locked_at",
        )
        .bind(lock.subject.storage_key())
        .bind(&lock.field)
        .bind(lock.tier.as_str())
        .bind(&lock.actor_id)
        .bind(lock.at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        record_lock_event(&mut tx, lock).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn remove_lock(&self, unlock: &FieldLock) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let removed = sqlx::query(
            "DELETE FROM field_locks WHERE subject_key = $1 AND field_name = $2",
        )
        .bind(unlock.subject.storage_key())
        .bind(&unlock.field)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?
        .rows_affected()
            > 0;
        if removed {
            record_lock_event(&mut tx, unlock).await?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(removed)
    }

    async fn lock_history(&self, subject: &SubjectKey) -> Result<Vec<FieldLock>, StoreError> {
        let rows = sqlx::query_as::<_, LockRow>(
            "SELECT subject_key, field_name, locked, tier, actor_id, at
             FROM field_lock_events WHERE subject_key = $1 ORDER BY at DESC, id DESC",
        )
        .bind(subject.storage_key())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(FieldLock::try_from).collect()
    }

    async fn load_global_policy(&self) -> Result<GlobalLockPolicy, StoreError> {
        let row = sqlx::query_as::<_, PolicyRow>(
            "SELECT fields, automated_respects_global, updated_by, updated_at
             FROM global_lock_policy WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(match row {
            Some(row) => GlobalLockPolicy {
                fields: row.fields.into_iter().collect(),
                automated_respects_global: row.automated_respects_global,
                updated_at: row.updated_by.as_ref().map(|_| row.updated_at),
                updated_by: row.updated_by,
            },
            None => GlobalLockPolicy::default(),
        })
    }

    async fn save_global_policy(&self, policy: &GlobalLockPolicy) -> Result<(), StoreError> {
        let fields: Vec<String> = policy.fields.iter().cloned().collect();
        sqlx::query(
            "INSERT INTO global_lock_policy
                 (id, fields, automated_respects_global, updated_by, updated_at)
             VALUES (1, $1, $2, $3, COALESCE($4, now()))
             ON CONFLICT (id) DO UPDATE
                 SET fields = EXCLUDED.fields,
                     automated_respects_global = EXCLUDED.automated_respects_global,
                     updated_by = EXCLUDED.updated_by,
                     updated_at = EXCLUDED.updated_at",
        )
        .bind(&fields)
        .bind(policy.automated_respects_global)
        .bind(&policy.updated_by)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

// ── Overrides ────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct OverrideRow {
    subject_key: String,
    actor_id: String,
    tier: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OverrideRow> for Override {
    type Error = StoreError;

    fn try_from(row: OverrideRow) -> Result<Self, Self::Error> {
        Ok(Override {
            subject: parse_subject(&row.subject_key)?,
            actor_id: row.actor_id,
            tier: parse_tier(&row.tier)?,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgOverrideStore {
    pool: PgPool,
}

impl PgOverrideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OverrideStore for PgOverrideStore {
    async fn get_override(&self, subject: &SubjectKey) -> Result<Option<Override>, StoreError> {
        let row = sqlx::query_as::<_, OverrideRow>(
            "SELECT subject_key, actor_id, tier, note, created_at
             FROM eligibility_overrides WHERE subject_key = $1",
        )
        .bind(subject.storage_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.map(Override::try_from).transpose()
    }

    async fn put_override(&self, entry: &Override) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO eligibility_overrides (subject_key, actor_id, tier, note, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (subject_key) DO UPDATE
                 SET actor_id = EXCLUDED.actor_id,
                     tier = EXCLUDED.tier,
                     note = EXCLUDED.note,
                     created_at = EXCLUDED.created_at",
        )
        .bind(entry.subject.storage_key())
        .bind(&entry.actor_id)
        .bind(entry.tier.as_str())
        .bind(&entry.note)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn list_overrides(&self) -> Result<Vec<Override>, StoreError> {
        let rows = sqlx::query_as::<_, OverrideRow>(
            "SELECT subject_key, actor_id, tier, note, created_at
             FROM eligibility_overrides ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(Override::try_from).collect()
    }

    async fn delete_override(&self, subject: &SubjectKey) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM eligibility_overrides WHERE subject_key = $1")
            .bind(subject.storage_key())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn parse_subject(raw: &str) -> Result<SubjectKey, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Database(format!("bad subject key '{raw}': {e}")))
}

fn parse_tier(raw: &str) -> Result<Tier, StoreError> {
    raw.parse().map_err(StoreError::Database)
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(format!("{what} already exists"));
        }
    }
    db_error(e)
}

fn db_error(e: sqlx::Error) -> StoreError {
    error!("catalog store database error: {}", e);
    StoreError::Database(e.to_string())
}
