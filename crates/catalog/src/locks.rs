//! Field-level editorial locks.
//!
//! A write to `(subject, field)` is blocked for the lowest tier when:
//! 1. an active [`FieldLock`] exists for the field or for [`ALL_FIELDS`], or
//! 2. the [`GlobalLockPolicy`] lists the field, automated writers are told
//!    to respect it, and the field already holds a value.
//!
//! Any tier above `member` bypasses both.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use shelf_core::{is_lockable_field, StoreError, SubjectKey, Tier, ALL_FIELDS};

use crate::error::CatalogError;
use crate::store::LockStore;

// ── Model ────────────────────────────────────────────────────────────

/// One lock or unlock event. Active locks always have `locked = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLock {
    pub subject: SubjectKey,
    pub field: String,
    pub locked: bool,
    pub tier: Tier,
    pub actor_id: String,
    pub at: DateTime<Utc>,
}

/// Field names locked on every subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLockPolicy {
    #[serde(default)]
    pub fields: BTreeSet<String>,
    /// When false, the global list is advisory for automated writers.
    #[serde(default = "default_true")]
    pub automated_respects_global: bool,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalLockPolicy {
    fn default() -> Self {
        Self {
            fields: BTreeSet::new(),
            automated_respects_global: true,
            updated_by: None,
            updated_at: None,
        }
    }
}

impl GlobalLockPolicy {
    fn covers(&self, field: &str) -> bool {
        self.fields.contains(field) || self.fields.contains(ALL_FIELDS)
    }
}

// ── Global policy cache ──────────────────────────────────────────────

/// Read-through cache of the global policy with explicit invalidation.
///
/// Shared by everything that resolves locks; whoever writes the policy
/// calls [`GlobalPolicyCache::invalidate`].
pub struct GlobalPolicyCache {
    store: Arc<dyn LockStore>,
    cached: RwLock<Option<Arc<GlobalLockPolicy>>>,
}

impl GlobalPolicyCache {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store, cached: RwLock::new(None) }
    }

    pub async fn get(&self) -> Result<Arc<GlobalLockPolicy>, StoreError> {
        if let Some(policy) = self.slot().clone() {
            return Ok(policy);
        }
        let loaded = Arc::new(self.store.load_global_policy().await?);
        *self.slot_mut() = Some(loaded.clone());
        debug!(fields = loaded.fields.len(), "global lock policy loaded");
        Ok(loaded)
    }

    pub fn invalidate(&self) {
        *self.slot_mut() = None;
    }

    pub fn is_warm(&self) -> bool {
        self.slot().is_some()
    }

    // Replace-only slot: a panicked writer cannot leave it half-updated.
    fn slot(&self) -> RwLockReadGuard<'_, Option<Arc<GlobalLockPolicy>>> {
        self.cached.read().unwrap_or_else(|poisoned| {
            warn!("global policy cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn slot_mut(&self) -> RwLockWriteGuard<'_, Option<Arc<GlobalLockPolicy>>> {
        self.cached.write().unwrap_or_else(|poisoned| {
            warn!("global policy cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

// ── Resolution ───────────────────────────────────────────────────────

/// The lock state of one subject, resolved once and queried per field.
#[derive(Debug, Clone)]
pub struct ResolvedLocks {
    fields: HashSet<String>,
    all: bool,
    global: Arc<GlobalLockPolicy>,
}

impl ResolvedLocks {
    pub fn new(active: &[FieldLock], global: Arc<GlobalLockPolicy>) -> Self {
        let fields: HashSet<String> = active
            .iter()
            .filter(|l| l.locked)
            .map(|l| l.field.clone())
            .collect();
        Self { all: fields.contains(ALL_FIELDS), fields, global }
    }

    /// No record locks and no global policy.
    pub fn none() -> Self {
        Self::new(&[], Arc::new(GlobalLockPolicy::default()))
    }

    /// Whether a write of `field` by `tier` is blocked. `has_value` says
    /// whether the field is currently populated on the stored record.
    pub fn is_locked(&self, field: &str, tier: Tier, has_value: bool) -> bool {
        if tier.is_privileged() {
            return false;
        }
        if self.all || self.fields.contains(field) {
            return true;
        }
        self.global.automated_respects_global && self.global.covers(field) && has_value
    }

    pub fn record_locked_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }
}

/// Entry point for lock queries and privileged lock mutations.
pub struct LockResolver {
    store: Arc<dyn LockStore>,
    policy: Arc<GlobalPolicyCache>,
}

impl LockResolver {
    pub fn new(store: Arc<dyn LockStore>, policy: Arc<GlobalPolicyCache>) -> Self {
        Self { store, policy }
    }

    pub fn policy_cache(&self) -> &Arc<GlobalPolicyCache> {
        &self.policy
    }

    pub async fn resolve(&self, subject: &SubjectKey) -> Result<ResolvedLocks, StoreError> {
        let active = self.store.active_locks(subject).await?;
        let global = self.policy.get().await?;
        Ok(ResolvedLocks::new(&active, global))
    }

    pub async fn is_locked(
        &self,
        subject: &SubjectKey,
        field: &str,
        tier: Tier,
        has_value: bool,
    ) -> Result<bool, StoreError> {
        if tier.is_privileged() {
            return Ok(false);
        }
        Ok(self.resolve(subject).await?.is_locked(field, tier, has_value))
    }

    /// Lock `field` (or [`ALL_FIELDS`]) on a subject. Only privileged tiers
    /// may lock.
    pub async fn set_lock(
        &self,
        subject: &SubjectKey,
        field: &str,
        tier: Tier,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<FieldLock, CatalogError> {
        if !tier.is_privileged() {
            return Err(CatalogError::Forbidden { tier, action: "lock fields" });
        }
        if !is_lockable_field(subject.kind, field) {
            return Err(CatalogError::UnknownField { kind: subject.kind, field: field.to_string() });
        }
        let lock = FieldLock {
            subject: subject.clone(),
            field: field.to_string(),
            locked: true,
            tier,
            actor_id: actor_id.to_string(),
            at: now,
        };
        self.store.put_lock(&lock).await?;
        info!(subject = %subject, field, %tier, actor = actor_id, "field locked");
        Ok(lock)
    }

    /// Remove the active lock on `field`. Returns whether one existed.
    pub async fn clear_lock(
        &self,
        subject: &SubjectKey,
        field: &str,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CatalogError> {
        let current_tier = self
            .store
            .active_locks(subject)
            .await?
            .into_iter()
            .find(|l| l.field == field)
            .map(|l| l.tier)
            .unwrap_or_default();
        let unlock = FieldLock {
            subject: subject.clone(),
            field: field.to_string(),
            locked: false,
            tier: current_tier,
            actor_id: actor_id.to_string(),
            at: now,
        };
        let removed = self.store.remove_lock(&unlock).await?;
        if removed {
            info!(subject = %subject, field, actor = actor_id, "field unlocked");
        }
        Ok(removed)
    }

    pub async fn history(&self, subject: &SubjectKey) -> Result<Vec<FieldLock>, StoreError> {
        self.store.lock_history(subject).await
    }

    pub async fn active(&self, subject: &SubjectKey) -> Result<Vec<FieldLock>, StoreError> {
        self.store.active_locks(subject).await
    }

    pub async fn global_policy(&self) -> Result<Arc<GlobalLockPolicy>, StoreError> {
        self.policy.get().await
    }

    /// Replace the global policy and drop the cached copy.
    pub async fn set_global_policy(
        &self,
        fields: BTreeSet<String>,
        automated_respects_global: bool,
        tier: Tier,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<GlobalLockPolicy, CatalogError> {
        if !tier.is_privileged() {
            return Err(CatalogError::Forbidden { tier, action: "change the global lock policy" });
        }
        let policy = GlobalLockPolicy {
            fields,
            automated_respects_global,
            updated_by: Some(actor_id.to_string()),
            updated_at: Some(now),
        };
        self.store.save_global_policy(&policy).await?;
        self.policy.invalidate();
        info!(
            fields = ?policy.fields,
            automated_respects_global,
            actor = actor_id,
            "global lock policy updated"
        );
        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLockStore;

    fn resolver() -> (LockResolver, Arc<MemoryLockStore>) {
        let store = Arc::new(MemoryLockStore::new());
        let cache = Arc::new(GlobalPolicyCache::new(store.clone()));
        (LockResolver::new(store.clone(), cache), store)
    }

    #[tokio::test]
    async fn test_record_lock_blocks_member_only() {
        let (resolver, _) = resolver();
        let work = SubjectKey::work("1");
        resolver.set_lock(&work, "title", Tier::Mod, "mod-1", Utc::now()).await.unwrap();

        assert!(resolver.is_locked(&work, "title", Tier::Member, false).await.unwrap());
        assert!(!resolver.is_locked(&work, "title", Tier::Trusted, true).await.unwrap());
        assert!(!resolver.is_locked(&work, "summary", Tier::Member, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_all_fields_lock() {
        let (resolver, _) = resolver();
        let work = SubjectKey::work("2");
        resolver.set_lock(&work, ALL_FIELDS, Tier::Admin, "a", Utc::now()).await.unwrap();
        let locks = resolver.resolve(&work).await.unwrap();
        assert!(locks.is_locked("summary", Tier::Member, false));
        assert!(locks.is_locked("word_count", Tier::Member, true));
        assert!(!locks.is_locked("summary", Tier::Mod, true));
    }

    #[tokio::test]
    async fn test_record_lock_wins_regardless_of_global_policy() {
        let (resolver, _) = resolver();
        let work = SubjectKey::work("3");
        resolver
            .set_global_policy(BTreeSet::new(), false, Tier::Admin, "a", Utc::now())
            .await
            .unwrap();
        resolver.set_lock(&work, "tags", Tier::Mod, "m", Utc::now()).await.unwrap();
        assert!(resolver.is_locked(&work, "tags", Tier::Member, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_global_policy_only_protects_populated_fields() {
        let (resolver, _) = resolver();
        let work = SubjectKey::work("4");
        resolver
            .set_global_policy(BTreeSet::from(["summary".to_string()]), true, Tier::Mod, "m", Utc::now())
            .await
            .unwrap();
        let locks = resolver.resolve(&work).await.unwrap();
        assert!(locks.is_locked("summary", Tier::Member, true));
        assert!(!locks.is_locked("summary", Tier::Member, false));
        assert!(!locks.is_locked("title", Tier::Member, true));
    }

    #[tokio::test]
    async fn test_global_policy_switch_off() {
        let (resolver, _) = resolver();
        resolver
            .set_global_policy(BTreeSet::from(["summary".to_string()]), false, Tier::Mod, "m", Utc::now())
            .await
            .unwrap();
        let locks = resolver.resolve(&SubjectKey::work("5")).await.unwrap();
        assert!(!locks.is_locked("summary", Tier::Member, true));
    }

    #[tokio::test]
    async fn test_set_global_policy_invalidates_cache() {
        let (resolver, _) = resolver();
        resolver.global_policy().await.unwrap();
        assert!(resolver.policy_cache().is_warm());
        resolver
            .set_global_policy(BTreeSet::from(["title".to_string()]), true, Tier::Admin, "a", Utc::now())
            .await
            .unwrap();
        assert!(!resolver.policy_cache().is_warm());
        let policy = resolver.global_policy().await.unwrap();
        assert!(policy.fields.contains("title"));
        assert_eq!(policy.updated_by.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_cache_serves_stale_until_invalidated() {
        let (resolver, store) = resolver();
        resolver.global_policy().await.unwrap();
        // Written behind the cache's back.
        store
            .save_global_policy(&GlobalLockPolicy {
                fields: BTreeSet::from(["rating".to_string()]),
                ..GlobalLockPolicy::default()
            })
            .await
            .unwrap();
        assert!(resolver.global_policy().await.unwrap().fields.is_empty());
        resolver.policy_cache().invalidate();
        assert!(resolver.global_policy().await.unwrap().fields.contains("rating"));
    }

    #[tokio::test]
    async fn test_cache_recovers_from_poisoned_lock() {
        let (_, store) = resolver();
        let cache = Arc::new(GlobalPolicyCache::new(store.clone()));
        let held = cache.clone();
        let panicked = std::thread::spawn(move || {
            let _guard = held.cached.write().unwrap();
            panic!("writer died holding the cache lock");
        })
        .join();
        assert!(panicked.is_err());
        assert!(cache.cached.is_poisoned());

        assert!(!cache.is_warm());
        assert!(cache.get().await.unwrap().fields.is_empty());
        assert!(cache.is_warm());

        store
            .save_global_policy(&GlobalLockPolicy {
                fields: BTreeSet::from(["summary".to_string()]),
                ..GlobalLockPolicy::default()
            })
            .await
            .unwrap();
        assert!(cache.get().await.unwrap().fields.is_empty());
        cache.invalidate();
        assert!(!cache.is_warm());
        assert!(cache.get().await.unwrap().fields.contains("summary"));
    }

    #[tokio::test]
    async fn test_set_lock_validation() {
        let (resolver, _) = resolver();
        let work = SubjectKey::work("6");
        let err = resolver
            .set_lock(&work, "title", Tier::Member, "u", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden { .. }));

        let err = resolver
            .set_lock(&work, "colour", Tier::Mod, "m", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownField { .. }));

        let series = SubjectKey::series("7");
        assert!(resolver.set_lock(&series, "name", Tier::Mod, "m", Utc::now()).await.is_ok());
        assert!(resolver.set_lock(&series, "rating", Tier::Mod, "m", Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_lock_keeps_history() {
        let (resolver, _) = resolver();
        let work = SubjectKey::work("8");
        let t0 = Utc::now();
        resolver.set_lock(&work, "title", Tier::Mod, "m", t0).await.unwrap();
        assert!(resolver
            .clear_lock(&work, "title", "m2", t0 + chrono::Duration::seconds(1))
            .await
            .unwrap());
        assert!(!resolver.clear_lock(&work, "title", "m2", t0).await.unwrap());

        assert!(!resolver.is_locked(&work, "title", Tier::Member, true).await.unwrap());
        let history = resolver.history(&work).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].locked);
        assert_eq!(history[0].actor_id, "m2");
        assert_eq!(history[0].tier, Tier::Mod);
        assert!(history[1].locked);
    }
}
