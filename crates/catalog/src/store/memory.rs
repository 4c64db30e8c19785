use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use shelf_core::{SeriesRecord, StoreError, SubjectKey, WorkRecord};

use super::{CatalogStore, LockStore, OverrideStore};
use crate::eligibility::Override;
use crate::locks::{FieldLock, GlobalLockPolicy};
use crate::merge::WorkPatch;

fn poisoned(what: &str) -> StoreError {
    StoreError::Database(format!("{what} lock poisoned"))
}

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read().map_err(|_| poisoned(what))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write().map_err(|_| poisoned(what))
}

// ── Records ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCatalogStore {
    works: RwLock<IndexMap<String, WorkRecord>>,
    series: RwLock<IndexMap<String, SeriesRecord>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn work_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<WorkRecord>, StoreError> {
        Ok(read(&self.works, "works")?.get(external_id).cloned())
    }

    async fn insert_work(&self, record: &WorkRecord) -> Result<WorkRecord, StoreError> {
        let mut works = write(&self.works, "works")?;
        if works.contains_key(&record.external_id) {
            return Err(StoreError::Conflict(format!("work {} already exists", record.external_id)));
        }
        works.insert(record.external_id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn apply_work_patch(
        &self,
        external_id: &str,
        patch: &WorkPatch,
        now: DateTime<Utc>,
    ) -> Result<WorkRecord, StoreError> {
        let mut works = write(&self.works, "works")?;
        let record = works
            .get_mut(external_id)
            .ok_or_else(|| StoreError::NotFound(format!("work {external_id}")))?;
        patch.apply(record);
        record.last_merged_at = now;
        Ok(record.clone())
    }

    async fn list_works(&self) -> Result<Vec<WorkRecord>, StoreError> {
        Ok(read(&self.works, "works")?.values().cloned().collect())
    }

    async fn series_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<SeriesRecord>, StoreError> {
        Ok(read(&self.series, "series")?.get(external_id).cloned())
    }

    async fn upsert_series(&self, record: &SeriesRecord) -> Result<SeriesRecord, StoreError> {
        write(&self.series, "series")?.insert(record.external_id.clone(), record.clone());
        Ok(record.clone())
    }
}

// ── Locks ────────────────────────────────────────────────────────────

#[derive(Default)]
struct LockState {
    active: HashMap<(SubjectKey, String), FieldLock>,
    events: Vec<FieldLock>,
    policy: GlobalLockPolicy,
}

#[derive(Default)]
pub struct MemoryLockStore {
    state: RwLock<LockState>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn active_locks(&self, subject: &SubjectKey) -> Result<Vec<FieldLock>, StoreError> {
        let state = read(&self.state, "locks")?;
        let mut locks: Vec<FieldLock> = state
            .active
            .values()
            .filter(|l| &l.subject == subject)
            .cloned()
            .collect();
        locks.sort_by(|a, b| a.field.cmp(&b.field));
        Ok(locks)
    }

    async fn put_lock(&self, lock: &FieldLock) -> Result<(), StoreError> {
        let mut state = write(&self.state, "locks")?;
        state
            .active
            .insert((lock.subject.clone(), lock.field.clone()), lock.clone());
        state.events.push(lock.clone());
        Ok(())
    }

    async fn remove_lock(&self, unlock: &FieldLock) -> Result<bool, StoreError> {
        let mut state = write(&self.state, "locks")?;
        let removed = state
            .active
            .remove(&(unlock.subject.clone(), unlock.field.clone()))
            .is_some();
        if removed {
            state.events.push(unlock.clone());
        }
        Ok(removed)
    }

    async fn lock_history(&self, subject: &SubjectKey) -> Result<Vec<FieldLock>, StoreError> {
        let state = read(&self.state, "locks")?;
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| &e.subject == subject)
            .cloned()
            .collect())
    }

    async fn load_global_policy(&self) -> Result<GlobalLockPolicy, StoreError> {
        Ok(read(&self.state, "locks")?.policy.clone())
    }

    async fn save_global_policy(&self, policy: &GlobalLockPolicy) -> Result<(), StoreError> {
        write(&self.state, "locks")?.policy = policy.clone();
        Ok(())
    }
}

// ── Overrides ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryOverrideStore {
    entries: RwLock<IndexMap<SubjectKey, Override>>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideStore for MemoryOverrideStore {
    async fn get_override(&self, subject: &SubjectKey) -> Result<Option<Override>, StoreError> {
        Ok(read(&self.entries, "overrides")?.get(subject).cloned())
    }

    async fn put_override(&self, entry: &Override) -> Result<(), StoreError> {
        write(&self.entries, "overrides")?.insert(entry.subject.clone(), entry.clone());
        Ok(())
    }

    async fn list_overrides(&self) -> Result<Vec<Override>, StoreError> {
        Ok(read(&self.entries, "overrides")?.values().cloned().collect())
    }

    async fn delete_override(&self, subject: &SubjectKey) -> Result<bool, StoreError> {
        Ok(write(&self.entries, "overrides")?
            .shift_remove(subject)
            .is_some())
    }
}
