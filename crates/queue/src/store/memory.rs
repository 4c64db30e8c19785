use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use uuid::Uuid;

use shelf_core::StoreError;

use super::JobStore;
use crate::job::{Finalization, IngestionJob, JobStatus, NewJob};

#[derive(Default)]
struct Inner {
    /// Insertion order doubles as submission order.
    jobs: IndexMap<Uuid, IngestionJob>,
    /// The unique index on `subject_url`.
    by_url: HashMap<String, Uuid>,
    subscribers: HashMap<Uuid, IndexSet<String>>,
}

/// In-process job store. All state lives behind one lock, so every method
/// is atomic with respect to the others.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Database("job store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Database("job store lock poisoned".to_string()))
    }
}

impl Inner {
    fn remove(&mut self, id: Uuid) -> Option<IngestionJob> {
        let job = self.jobs.shift_remove(&id)?;
        self.by_url.remove(&job.subject_url);
        self.subscribers.remove(&id);
        Some(job)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, new: NewJob) -> Result<IngestionJob, StoreError> {
        let mut inner = self.write()?;
        if inner.by_url.contains_key(&new.subject_url) {
            return Err(StoreError::Conflict(format!(
                "ingestion job for {} already exists",
                new.subject_url
            )));
        }
        let instant = inner.jobs.values().all(|j| j.status.is_terminal());
        let requester = new.requester.clone();
        let job = new.into_job(instant);

        inner.by_url.insert(job.subject_url.clone(), job.id);
        inner
            .subscribers
            .insert(job.id, IndexSet::from([requester]));
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<IngestionJob>, StoreError> {
        Ok(self.read()?.jobs.get(&id).cloned())
    }

    async fn get_by_url(&self, subject_url: &str) -> Result<Option<IngestionJob>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .by_url
            .get(subject_url)
            .and_then(|id| inner.jobs.get(id))
            .cloned())
    }

    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<IngestionJob>, StoreError> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect())
    }

    async fn add_subscriber_if_active(
        &self,
        job_id: Uuid,
        requester: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status.is_terminal() {
            return Ok(false);
        }
        if !job.requested_by.iter().any(|r| r == requester) {
            job.requested_by.push(requester.to_string());
        }
        inner
            .subscribers
            .entry(job_id)
            .or_default()
            .insert(requester.to_string());
        Ok(true)
    }

    async fn subscribers(&self, job_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()?
            .subscribers
            .get(&job_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn detach_subscribers(&self, job_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(self
            .write()?
            .subscribers
            .remove(&job_id)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<IngestionJob>, StoreError> {
        let mut inner = self.write()?;
        let next = inner
            .jobs
            .values_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| j.submitted_at);
        Ok(next.map(|job| {
            job.status = JobStatus::Processing;
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn finalize(
        &self,
        job_id: Uuid,
        outcome: &Finalization,
        now: DateTime<Utc>,
    ) -> Result<IngestionJob, StoreError> {
        let mut inner = self.write()?;
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("ingestion job {job_id}")))?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::InvalidTransition(format!(
                "job {job_id} is {}, cannot become {}",
                job.status, outcome.status
            )));
        }
        outcome.apply_to(job, now);
        Ok(job.clone())
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.write()?.remove(job_id).is_some())
    }

    async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.write()?;
        let expired: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.finished_at.unwrap_or(j.updated_at) < cutoff)
            .map(|j| j.id)
            .collect();
        for id in &expired {
            inner.remove(*id);
        }
        Ok(expired.len() as u64)
    }

    async fn stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<IngestionJob>, StoreError> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing && j.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn reset_to_pending(
        &self,
        include_errors: bool,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.write()?;
        let mut count = 0;
        for job in inner.jobs.values_mut() {
            let eligible = job.status == JobStatus::Processing
                || (include_errors && job.status == JobStatus::Error);
            if eligible {
                job.status = JobStatus::Pending;
                job.updated_at = now;
                job.finished_at = None;
                job.error_message = None;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::job::BatchKind;

    fn new_job(url: &str, requester: &str, at: DateTime<Utc>) -> NewJob {
        NewJob {
            subject_url: url.to_string(),
            batch_kind: BatchKind::Single,
            requester: requester.to_string(),
            submitted_at: at,
        }
    }

    #[tokio::test]
    async fn test_insert_enforces_unique_url() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        store.insert(new_job("https://h/works/1", "a", now)).await.unwrap();
        let err = store.insert(new_job("https://h/works/1", "b", now)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_instant_candidate_only_when_idle() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let first = store.insert(new_job("https://h/works/1", "a", now)).await.unwrap();
        let second = store.insert(new_job("https://h/works/2", "a", now)).await.unwrap();
        assert!(first.instant_candidate);
        assert!(!second.instant_candidate);
    }

    #[tokio::test]
    async fn test_claim_oldest_pending_first() {
        let store = MemoryJobStore::new();
        let t0 = Utc::now();
        store.insert(new_job("https://h/works/2", "a", t0 + Duration::seconds(5))).await.unwrap();
        store.insert(new_job("https://h/works/1", "a", t0)).await.unwrap();

        let claimed = store.claim_next(t0).await.unwrap().unwrap();
        assert_eq!(claimed.subject_url, "https://h/works/1");
        assert_eq!(claimed.status, JobStatus::Processing);
        let claimed = store.claim_next(t0).await.unwrap().unwrap();
        assert_eq!(claimed.subject_url, "https://h/works/2");
        assert!(store.claim_next(t0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_only_join_active_jobs() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let job = store.insert(new_job("https://h/works/1", "a", now)).await.unwrap();
        assert!(store.add_subscriber_if_active(job.id, "b").await.unwrap());
        assert!(store.add_subscriber_if_active(job.id, "b").await.unwrap());
        assert_eq!(store.subscribers(job.id).await.unwrap(), vec!["a", "b"]);

        store.claim_next(now).await.unwrap();
        store.finalize(job.id, &Finalization::error("boom"), now).await.unwrap();
        assert!(!store.add_subscriber_if_active(job.id, "c").await.unwrap());

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.requested_by, vec!["a", "b"]);
        assert_eq!(store.detach_subscribers(job.id).await.unwrap(), vec!["a", "b"]);
        assert!(store.subscribers(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_requires_processing() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let job = store.insert(new_job("https://h/works/1", "a", now)).await.unwrap();
        let err = store
            .finalize(job.id, &Finalization::done(serde_json::json!({})), now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_purge_and_reset() {
        let store = MemoryJobStore::new();
        let t0 = Utc::now();
        let a = store.insert(new_job("https://h/works/1", "a", t0)).await.unwrap();
        store.insert(new_job("https://h/works/2", "a", t0)).await.unwrap();
        store.claim_next(t0).await.unwrap();
        store.finalize(a.id, &Finalization::done(serde_json::json!({})), t0).await.unwrap();
        store.claim_next(t0).await.unwrap();

        let stale = store.stale_processing(t0 + Duration::seconds(1)).await.unwrap();
        assert_eq!(stale.len(), 1);

        assert_eq!(store.purge_terminal_before(t0 + Duration::seconds(1)).await.unwrap(), 1);
        assert!(store.get_by_url("https://h/works/1").await.unwrap().is_none());

        assert_eq!(store.reset_to_pending(false, t0).await.unwrap(), 1);
        assert_eq!(store.list(Some(JobStatus::Pending)).await.unwrap().len(), 1);
    }
}
