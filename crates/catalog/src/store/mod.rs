//! Catalog persistence.
//!
//! Three narrow traits, each with an in-memory and a PostgreSQL backend:
//! [`CatalogStore`] for work/series records, [`LockStore`] for field locks
//! and the global lock policy, [`OverrideStore`] for eligibility overrides.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shelf_core::{SeriesRecord, StoreError, SubjectKey, WorkRecord};

use crate::eligibility::Override;
use crate::locks::{FieldLock, GlobalLockPolicy};
use crate::merge::WorkPatch;

pub use memory::{MemoryCatalogStore, MemoryLockStore, MemoryOverrideStore};
pub use postgres::{PgCatalogStore, PgLockStore, PgOverrideStore};

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn work_by_external_id(&self, external_id: &str)
        -> Result<Option<WorkRecord>, StoreError>;

    /// Insert a new record. A second record for the same external id is a
    /// [`StoreError::Conflict`].
    async fn insert_work(&self, record: &WorkRecord) -> Result<WorkRecord, StoreError>;

    /// Apply a patch as one atomic update and return the reloaded record.
    async fn apply_work_patch(
        &self,
        external_id: &str,
        patch: &WorkPatch,
        now: DateTime<Utc>,
    ) -> Result<WorkRecord, StoreError>;

    async fn list_works(&self) -> Result<Vec<WorkRecord>, StoreError>;

    async fn series_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<SeriesRecord>, StoreError>;

    async fn upsert_series(&self, record: &SeriesRecord) -> Result<SeriesRecord, StoreError>;
}

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Current locks on the subject (at most one per field).
    async fn active_locks(&self, subject: &SubjectKey) -> Result<Vec<FieldLock>, StoreError>;

    /// Make `lock` the active lock for its field and record the event.
    async fn put_lock(&self, lock: &FieldLock) -> Result<(), StoreError>;

    /// Drop the active lock for a field, recording `unlock` as the event.
    /// Returns whether a lock was active.
    async fn remove_lock(&self, unlock: &FieldLock) -> Result<bool, StoreError>;

    /// Every lock and unlock event for the subject, newest first.
    async fn lock_history(&self, subject: &SubjectKey) -> Result<Vec<FieldLock>, StoreError>;

    async fn load_global_policy(&self) -> Result<GlobalLockPolicy, StoreError>;

    async fn save_global_policy(&self, policy: &GlobalLockPolicy) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn get_override(&self, subject: &SubjectKey) -> Result<Option<Override>, StoreError>;

    async fn put_override(&self, entry: &Override) -> Result<(), StoreError>;

    async fn list_overrides(&self) -> Result<Vec<Override>, StoreError>;

    async fn delete_override(&self, subject: &SubjectKey) -> Result<bool, StoreError>;
}
