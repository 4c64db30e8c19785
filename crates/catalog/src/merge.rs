//! Minimal, lock-honoring merges of fetched metadata into stored records.
//!
//! A field is staged into the [`WorkPatch`] iff its incoming value differs
//! from the stored one and the field is not locked for the acting tier.
//! First-time ingestion creates the whole record; locks only constrain
//! updates.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use shelf_core::{
    ChapterProgress, CompletionStatus, Engagement, Rating, SeriesField, SeriesRecord, StoreError,
    SubjectKey, Tier, WorkField, WorkRecord,
};

use crate::error::CatalogError;
use crate::locks::{LockResolver, ResolvedLocks};
use crate::store::CatalogStore;

// ── Field-level changes ──────────────────────────────────────────────

macro_rules! work_changes {
    ($( $variant:ident ( $ty:ty ) => $($path:ident).+ ; )*) => {
        /// A new value for one [`WorkField`].
        #[derive(Debug, Clone, PartialEq)]
        pub enum WorkChange {
            $( $variant($ty), )*
        }

        impl WorkChange {
            pub fn field(&self) -> WorkField {
                match self {
                    $( WorkChange::$variant(_) => WorkField::$variant, )*
                }
            }

            /// The value `record` holds for `field`.
            pub fn from_record(field: WorkField, record: &WorkRecord) -> Self {
                match field {
                    $( WorkField::$variant => WorkChange::$variant(record.$($path).+.clone()), )*
                }
            }

            /// Parse a JSON value for `field`, as sent by manual edits.
            pub fn from_json(
                field: WorkField,
                value: serde_json::Value,
            ) -> Result<Self, serde_json::Error> {
                Ok(match field {
                    $( WorkField::$variant => WorkChange::$variant(serde_json::from_value(value)?), )*
                })
            }

            pub fn differs_from(&self, record: &WorkRecord) -> bool {
                match self {
                    $( WorkChange::$variant(v) => *v != record.$($path).+, )*
                }
            }

            pub fn apply(&self, record: &mut WorkRecord) {
                match self {
                    $( WorkChange::$variant(v) => record.$($path).+ = v.clone(), )*
                }
            }
        }
    };
}

work_changes! {
    Title(String) => title;
    Authors(Vec<String>) => authors;
    Summary(String) => summary;
    Tags(BTreeSet<String>) => tags;
    Rating(Rating) => rating;
    WordCount(u64) => word_count;
    Chapters(ChapterProgress) => chapters;
    Status(CompletionStatus) => status;
    Language(String) => language;
    PublishedAt(Option<DateTime<Utc>>) => published_at;
    UpdatedAt(Option<DateTime<Utc>>) => updated_at;
    Engagement(Engagement) => engagement;
    Warnings(BTreeSet<String>) => warnings;
    Fandoms(BTreeSet<String>) => facets.fandoms;
    Relationships(BTreeSet<String>) => facets.relationships;
    Characters(BTreeSet<String>) => facets.characters;
    Freeform(BTreeSet<String>) => facets.freeform;
    SeriesLink(Option<String>) => series_link;
    PrimaryInSeries(bool) => is_primary_in_series;
}

/// The staged changes for one record, plus the changed fields that locks held back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkPatch {
    pub changes: Vec<WorkChange>,
    pub blocked: Vec<WorkField>,
}

impl WorkPatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn fields(&self) -> Vec<WorkField> {
        self.changes.iter().map(WorkChange::field).collect()
    }

    pub fn apply(&self, record: &mut WorkRecord) {
        for change in &self.changes {
            change.apply(record);
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub record: WorkRecord,
    pub action: MergeAction,
    pub applied: Vec<WorkField>,
    pub blocked: Vec<WorkField>,
}

pub struct MergeEngine {
    catalog: Arc<dyn CatalogStore>,
    locks: Arc<LockResolver>,
}

impl MergeEngine {
    pub fn new(catalog: Arc<dyn CatalogStore>, locks: Arc<LockResolver>) -> Self {
        Self { catalog, locks }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    /// Stage every change that differs from `existing` and is not locked
    /// for `tier`.
    pub fn plan(
        existing: &WorkRecord,
        changes: impl IntoIterator<Item = WorkChange>,
        locks: &ResolvedLocks,
        tier: Tier,
    ) -> WorkPatch {
        let mut patch = WorkPatch::default();
        for change in changes {
            if !change.differs_from(existing) {
                continue;
            }
            let field = change.field();
            if locks.is_locked(field.as_str(), tier, existing.has_value(field)) {
                patch.blocked.push(field);
            } else {
                patch.changes.push(change);
            }
        }
        patch
    }

    /// Merge a freshly built record, comparing only `fields`.
    pub async fn merge_work(
        &self,
        candidate: WorkRecord,
        fields: &[WorkField],
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome, CatalogError> {
        let existing = match self.catalog.work_by_external_id(&candidate.external_id).await? {
            Some(existing) => existing,
            None => match self.catalog.insert_work(&candidate).await {
                Ok(record) => {
                    info!(work = %record.external_id, "work record created");
                    return Ok(MergeOutcome {
                        record,
                        action: MergeAction::Created,
                        applied: WorkField::all().collect(),
                        blocked: Vec::new(),
                    });
                }
                // Created concurrently; merge into it instead.
                Err(StoreError::Conflict(_)) => self
                    .catalog
                    .work_by_external_id(&candidate.external_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("work {}", candidate.external_id)))?,
                Err(e) => return Err(e.into()),
            },
        };

        let changes: Vec<WorkChange> = fields
            .iter()
            .map(|f| WorkChange::from_record(*f, &candidate))
            .collect();
        self.commit(existing, changes, tier, now).await
    }

    /// Apply edits made by a person, honoring locks at their tier.
    pub async fn apply_manual_edit(
        &self,
        external_id: &str,
        changes: Vec<WorkChange>,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome, CatalogError> {
        let existing = self
            .catalog
            .work_by_external_id(external_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("work {external_id}")))?;
        self.commit(existing, changes, tier, now).await
    }

    async fn commit(
        &self,
        existing: WorkRecord,
        changes: Vec<WorkChange>,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome, CatalogError> {
        let locks = self.locks.resolve(&SubjectKey::work(&existing.external_id)).await?;
        let patch = Self::plan(&existing, changes, &locks, tier);

        if patch.is_empty() {
            debug!(work = %existing.external_id, blocked = ?patch.blocked, "merge produced no changes");
            return Ok(MergeOutcome {
                record: existing,
                action: MergeAction::Unchanged,
                applied: Vec::new(),
                blocked: patch.blocked,
            });
        }

        let record = self
            .catalog
            .apply_work_patch(&existing.external_id, &patch, now)
            .await?;
        info!(
            work = %record.external_id,
            fields = ?patch.fields(),
            blocked = ?patch.blocked,
            %tier,
            "work record updated"
        );
        Ok(MergeOutcome {
            record,
            action: MergeAction::Updated,
            applied: patch.fields(),
            blocked: patch.blocked,
        })
    }

    /// Merge an aggregated series record. Locked, populated fields keep
    /// their stored value.
    pub async fn merge_series(
        &self,
        candidate: SeriesRecord,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<(SeriesRecord, MergeAction), CatalogError> {
        let Some(existing) = self.catalog.series_by_external_id(&candidate.external_id).await?
        else {
            let record = self.catalog.upsert_series(&candidate).await?;
            info!(series = %record.external_id, "series record created");
            return Ok((record, MergeAction::Created));
        };

        let locks = self.locks.resolve(&SubjectKey::series(&existing.external_id)).await?;
        let mut merged = existing.clone();
        let mut changed = Vec::new();
        for field in SeriesField::ALL {
            if !series_field_differs(&existing, &candidate, field) {
                continue;
            }
            if locks.is_locked(field.as_str(), tier, existing.has_value(field)) {
                continue;
            }
            copy_series_field(&mut merged, &candidate, field);
            changed.push(field);
        }

        if changed.is_empty() {
            return Ok((existing, MergeAction::Unchanged));
        }
        merged.last_merged_at = now;
        let record = self.catalog.upsert_series(&merged).await?;
        info!(series = %record.external_id, fields = ?changed, "series record updated");
        Ok((record, MergeAction::Updated))
    }
}

fn series_field_differs(a: &SeriesRecord, b: &SeriesRecord, field: SeriesField) -> bool {
    match field {
        SeriesField::Name => a.name != b.name,
        SeriesField::Summary => a.summary != b.summary,
        SeriesField::Members => a.member_ids != b.member_ids,
        SeriesField::Authors => a.authors != b.authors,
        SeriesField::WorkCount => a.work_count != b.work_count,
        SeriesField::WordCount => a.word_count != b.word_count,
        SeriesField::Status => a.status != b.status,
        SeriesField::PrimaryWork => a.primary_work_id != b.primary_work_id,
    }
}

fn copy_series_field(dst: &mut SeriesRecord, src: &SeriesRecord, field: SeriesField) {
    match field {
        SeriesField::Name => dst.name = src.name.clone(),
        SeriesField::Summary => dst.summary = src.summary.clone(),
        SeriesField::Members => dst.member_ids = src.member_ids.clone(),
        SeriesField::Authors => dst.authors = src.authors.clone(),
        SeriesField::WorkCount => dst.work_count = src.work_count,
        SeriesField::WordCount => dst.word_count = src.word_count,
        SeriesField::Status => dst.status = src.status,
        SeriesField::PrimaryWork => dst.primary_work_id = src.primary_work_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use shelf_core::WorkMetadata;

    use super::*;
    use crate::locks::GlobalPolicyCache;
    use crate::store::{MemoryCatalogStore, MemoryLockStore};

    fn metadata(title: &str, words: u64) -> WorkMetadata {
        serde_json::from_value(serde_json::json!({
            "external_id": "321",
            "title": title,
            "authors": ["writer"],
            "summary": "Original summary",
            "tags": ["Angst"],
            "rating": "teen",
            "word_count": words,
            "published_at": null,
            "updated_at": null,
            "facets": { "fandoms": ["Supernatural (TV 2005)"] }
        }))
        .unwrap()
    }

    fn record(meta: WorkMetadata) -> WorkRecord {
        WorkRecord::from_metadata("https://archive.example.org/works/321", meta, Utc::now())
    }

    fn engine() -> (MergeEngine, Arc<LockResolver>) {
        let lock_store = Arc::new(MemoryLockStore::new());
        let cache = Arc::new(GlobalPolicyCache::new(lock_store.clone()));
        let locks = Arc::new(LockResolver::new(lock_store, cache));
        (MergeEngine::new(Arc::new(MemoryCatalogStore::new()), locks.clone()), locks)
    }

    fn metadata_changes(candidate: &WorkRecord) -> Vec<WorkChange> {
        WorkField::METADATA
            .iter()
            .map(|f| WorkChange::from_record(*f, candidate))
            .collect()
    }

    #[test]
    fn test_plan_contains_exactly_changed_unlocked_fields() {
        let existing = record(metadata("Old", 100));
        let mut candidate = record(metadata("New", 200));
        candidate.summary = existing.summary.clone();

        let patch = MergeEngine::plan(
            &existing,
            metadata_changes(&candidate),
            &ResolvedLocks::none(),
            Tier::AUTOMATED,
        );
        assert_eq!(patch.fields(), vec![WorkField::Title, WorkField::WordCount]);
        assert!(patch.blocked.is_empty());
    }

    #[test]
    fn test_plan_is_idempotent() {
        let mut existing = record(metadata("Old", 100));
        let candidate = record(metadata("New", 200));
        let locks = ResolvedLocks::none();

        let first = MergeEngine::plan(&existing, metadata_changes(&candidate), &locks, Tier::Member);
        assert!(!first.is_empty());
        first.apply(&mut existing);
        let second = MergeEngine::plan(&existing, metadata_changes(&candidate), &locks, Tier::Member);
        assert!(second.is_empty());
    }

    #[test]
    fn test_author_order_matters_but_tag_order_does_not() {
        let mut existing = record(metadata("T", 1));
        existing.authors = vec!["a".into(), "b".into()];
        let mut candidate = existing.clone();
        candidate.authors = vec!["b".into(), "a".into()];
        candidate.tags = existing.tags.iter().rev().cloned().collect();

        let patch = MergeEngine::plan(
            &existing,
            metadata_changes(&candidate),
            &ResolvedLocks::none(),
            Tier::Member,
        );
        assert_eq!(patch.fields(), vec![WorkField::Authors]);
    }

    #[tokio::test]
    async fn test_first_ingestion_creates_full_record_despite_locks() {
        let (engine, locks) = engine();
        let work = SubjectKey::work("321");
        locks.set_lock(&work, "ALL", Tier::Admin, "a", Utc::now()).await.unwrap();

        let out = engine
            .merge_work(record(metadata("Fresh", 10)), &WorkField::METADATA, Tier::AUTOMATED, Utc::now())
            .await
            .unwrap();
        assert_eq!(out.action, MergeAction::Created);
        assert_eq!(out.record.title, "Fresh");
    }

    #[tokio::test]
    async fn test_locked_title_kept_other_fields_updated() {
        let (engine, locks) = engine();
        let now = Utc::now();
        engine
            .merge_work(record(metadata("Curated", 10)), &WorkField::METADATA, Tier::AUTOMATED, now)
            .await
            .unwrap();
        locks.set_lock(&SubjectKey::work("321"), "title", Tier::Mod, "mod", now).await.unwrap();

        let out = engine
            .merge_work(record(metadata("Scraped", 99)), &WorkField::METADATA, Tier::Member, now)
            .await
            .unwrap();
        assert_eq!(out.action, MergeAction::Updated);
        assert_eq!(out.record.title, "Curated");
        assert_eq!(out.record.word_count, 99);
        assert_eq!(out.blocked, vec![WorkField::Title]);
        assert!(!out.applied.contains(&WorkField::Title));
    }

    #[tokio::test]
    async fn test_manual_edit_by_moderator_bypasses_lock() {
        let (engine, locks) = engine();
        let now = Utc::now();
        engine
            .merge_work(record(metadata("Curated", 10)), &WorkField::METADATA, Tier::AUTOMATED, now)
            .await
            .unwrap();
        locks.set_lock(&SubjectKey::work("321"), "title", Tier::Mod, "mod", now).await.unwrap();

        let edit = vec![WorkChange::from_json(WorkField::Title, serde_json::json!("Fixed")).unwrap()];
        let out = engine
            .apply_manual_edit("321", edit.clone(), Tier::Member, now)
            .await
            .unwrap();
        assert_eq!(out.action, MergeAction::Unchanged);
        assert_eq!(out.blocked, vec![WorkField::Title]);

        let out = engine.apply_manual_edit("321", edit, Tier::Mod, now).await.unwrap();
        assert_eq!(out.record.title, "Fixed");
    }

    #[tokio::test]
    async fn test_manual_edit_unknown_work() {
        let (engine, _) = engine();
        let err = engine
            .apply_manual_edit("nope", Vec::new(), Tier::Admin, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_series_merge_keeps_locked_fields() {
        let (engine, locks) = engine();
        let now = Utc::now();
        let base = SeriesRecord {
            id: uuid::Uuid::new_v4(),
            external_id: "77".into(),
            url: "https://archive.example.org/series/77".into(),
            name: "Curated Name".into(),
            summary: String::new(),
            member_ids: vec!["1".into()],
            authors: vec!["w".into()],
            work_count: 1,
            word_count: 10,
            status: CompletionStatus::InProgress,
            primary_work_id: Some("1".into()),
            created_at: now,
            last_merged_at: now,
        };
        engine.merge_series(base.clone(), Tier::AUTOMATED, now).await.unwrap();
        locks.set_lock(&SubjectKey::series("77"), "name", Tier::Mod, "m", now).await.unwrap();

        let mut fetched = base.clone();
        fetched.name = "Scraped Name".into();
        fetched.word_count = 50;
        let (merged, action) = engine.merge_series(fetched, Tier::AUTOMATED, now).await.unwrap();
        assert_eq!(action, MergeAction::Updated);
        assert_eq!(merged.name, "Curated Name");
        assert_eq!(merged.word_count, 50);
        assert_eq!(merged.id, base.id);
    }
}
