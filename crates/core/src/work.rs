//! Catalog records and the normalized metadata the fetcher produces.
//!
//! [`WorkMetadata`] / [`SeriesMetadata`] are what a fetch returns;
//! [`WorkRecord`] / [`SeriesRecord`] are what the catalog stores.
//! Field names used by locks are enumerated by [`WorkField`] and [`SeriesField`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::subject::SubjectKind;

/// Reserved lock field name meaning "every field on the subject".
pub const ALL_FIELDS: &str = "ALL";

/// Author used when a fetched work lists nobody.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

// ── Enums ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    #[default]
    NotRated,
    General,
    Teen,
    Mature,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    InProgress,
    Complete,
}

// ── Value types ──────────────────────────────────────────────────────

/// Posted chapters out of the planned total (`None` = open-ended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub posted: u32,
    pub planned: Option<u32>,
}

/// Engagement counters. Unsigned, so never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Engagement {
    pub views: u64,
    pub likes: u64,
    pub bookmarks: u64,
    pub comments: u64,
}

impl Engagement {
    pub fn is_zero(&self) -> bool {
        *self == Engagement::default()
    }
}

/// The four typed tag facets. Sets: order is not significant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagFacets {
    #[serde(default)]
    pub fandoms: BTreeSet<String>,
    #[serde(default)]
    pub relationships: BTreeSet<String>,
    #[serde(default)]
    pub characters: BTreeSet<String>,
    #[serde(default)]
    pub freeform: BTreeSet<String>,
}

// ── Fetched metadata ─────────────────────────────────────────────────

/// Normalized metadata for one work, as returned by the fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkMetadata {
    pub external_id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub rating: Rating,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub chapters: ChapterProgress,
    #[serde(default)]
    pub status: CompletionStatus,
    #[serde(default)]
    pub language: String,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default)]
    pub warnings: BTreeSet<String>,
    #[serde(default)]
    pub facets: TagFacets,
}

impl WorkMetadata {
    /// Trim text, drop blank tags and guarantee a non-empty author list.
    pub fn normalized(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.summary = self.summary.trim().to_string();
        self.language = self.language.trim().to_string();
        self.authors = self
            .authors
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if self.authors.is_empty() {
            self.authors.push(ANONYMOUS_AUTHOR.to_string());
        }
        self.tags = clean_set(self.tags);
        self.warnings = clean_set(self.warnings);
        self.facets = TagFacets {
            fandoms: clean_set(self.facets.fandoms),
            relationships: clean_set(self.facets.relationships),
            characters: clean_set(self.facets.characters),
            freeform: clean_set(self.facets.freeform),
        };
        self
    }
}

fn clean_set(set: BTreeSet<String>) -> BTreeSet<String> {
    set.into_iter()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Normalized metadata for a series (collection) page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub authors: Vec<String>,
    /// Member work URLs in series order.
    #[serde(default)]
    pub member_urls: Vec<String>,
    #[serde(default)]
    pub work_count: u32,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub status: CompletionStatus,
}

// ── Stored records ───────────────────────────────────────────────────

/// Canonical stored metadata for one work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRecord {
    pub id: Uuid,
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    pub tags: BTreeSet<String>,
    pub rating: Rating,
    pub word_count: u64,
    pub chapters: ChapterProgress,
    pub status: CompletionStatus,
    pub language: String,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub engagement: Engagement,
    pub warnings: BTreeSet<String>,
    pub facets: TagFacets,
    /// External id of the series this work belongs to, if any.
    pub series_link: Option<String>,
    pub is_primary_in_series: bool,
    pub created_at: DateTime<Utc>,
    pub last_merged_at: DateTime<Utc>,
}

impl WorkRecord {
    /// Build a complete record from freshly fetched metadata.
    pub fn from_metadata(url: &str, meta: WorkMetadata, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: meta.external_id,
            url: url.to_string(),
            title: meta.title,
            authors: meta.authors,
            summary: meta.summary,
            tags: meta.tags,
            rating: meta.rating,
            word_count: meta.word_count,
            chapters: meta.chapters,
            status: meta.status,
            language: meta.language,
            published_at: meta.published_at,
            updated_at: meta.updated_at,
            engagement: meta.engagement,
            warnings: meta.warnings,
            facets: meta.facets,
            series_link: None,
            is_primary_in_series: false,
            created_at: now,
            last_merged_at: now,
        }
    }

    /// Whether `field` currently holds a non-empty value.
    pub fn has_value(&self, field: WorkField) -> bool {
        match field {
            WorkField::Title => !self.title.is_empty(),
            WorkField::Authors => !self.authors.is_empty(),
            WorkField::Summary => !self.summary.is_empty(),
            WorkField::Tags => !self.tags.is_empty(),
            WorkField::Rating => self.rating != Rating::NotRated,
            WorkField::WordCount => self.word_count > 0,
            WorkField::Chapters => self.chapters.posted > 0,
            WorkField::Status => true,
            WorkField::Language => !self.language.is_empty(),
            WorkField::PublishedAt => self.published_at.is_some(),
            WorkField::UpdatedAt => self.updated_at.is_some(),
            WorkField::Engagement => !self.engagement.is_zero(),
            WorkField::Warnings => !self.warnings.is_empty(),
            WorkField::Fandoms => !self.facets.fandoms.is_empty(),
            WorkField::Relationships => !self.facets.relationships.is_empty(),
            WorkField::Characters => !self.facets.characters.is_empty(),
            WorkField::Freeform => !self.facets.freeform.is_empty(),
            WorkField::SeriesLink => self.series_link.is_some(),
            WorkField::PrimaryInSeries => true,
        }
    }
}

/// Aggregated record for one series (collection) URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub id: Uuid,
    pub external_id: String,
    pub url: String,
    pub name: String,
    pub summary: String,
    /// Member work external ids in series order.
    pub member_ids: Vec<String>,
    pub authors: Vec<String>,
    pub work_count: u32,
    pub word_count: u64,
    pub status: CompletionStatus,
    pub primary_work_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_merged_at: DateTime<Utc>,
}

impl SeriesRecord {
    pub fn has_value(&self, field: SeriesField) -> bool {
        match field {
            SeriesField::Name => !self.name.is_empty(),
            SeriesField::Summary => !self.summary.is_empty(),
            SeriesField::Members => !self.member_ids.is_empty(),
            SeriesField::Authors => !self.authors.is_empty(),
            SeriesField::WorkCount => self.work_count > 0,
            SeriesField::WordCount => self.word_count > 0,
            SeriesField::Status => true,
            SeriesField::PrimaryWork => self.primary_work_id.is_some(),
        }
    }
}

// ── Field names ──────────────────────────────────────────────────────

/// Mutable fields of a [`WorkRecord`], as named by locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkField {
    Title,
    Authors,
    Summary,
    Tags,
    Rating,
    WordCount,
    Chapters,
    Status,
    Language,
    PublishedAt,
    UpdatedAt,
    Engagement,
    Warnings,
    Fandoms,
    Relationships,
    Characters,
    Freeform,
    SeriesLink,
    #[serde(rename = "is_primary_in_series")]
    PrimaryInSeries,
}

impl WorkField {
    /// Fields populated from a work page.
    pub const METADATA: [WorkField; 17] = [
        WorkField::Title,
        WorkField::Authors,
        WorkField::Summary,
        WorkField::Tags,
        WorkField::Rating,
        WorkField::WordCount,
        WorkField::Chapters,
        WorkField::Status,
        WorkField::Language,
        WorkField::PublishedAt,
        WorkField::UpdatedAt,
        WorkField::Engagement,
        WorkField::Warnings,
        WorkField::Fandoms,
        WorkField::Relationships,
        WorkField::Characters,
        WorkField::Freeform,
    ];

    /// Fields only the series path writes.
    pub const SERIES: [WorkField; 2] = [WorkField::SeriesLink, WorkField::PrimaryInSeries];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkField::Title => "title",
            WorkField::Authors => "authors",
            WorkField::Summary => "summary",
            WorkField::Tags => "tags",
            WorkField::Rating => "rating",
            WorkField::WordCount => "word_count",
            WorkField::Chapters => "chapters",
            WorkField::Status => "status",
            WorkField::Language => "language",
            WorkField::PublishedAt => "published_at",
            WorkField::UpdatedAt => "updated_at",
            WorkField::Engagement => "engagement",
            WorkField::Warnings => "warnings",
            WorkField::Fandoms => "fandoms",
            WorkField::Relationships => "relationships",
            WorkField::Characters => "characters",
            WorkField::Freeform => "freeform",
            WorkField::SeriesLink => "series_link",
            WorkField::PrimaryInSeries => "is_primary_in_series",
        }
    }

    pub fn all() -> impl Iterator<Item = WorkField> {
        Self::METADATA.into_iter().chain(Self::SERIES)
    }
}

impl fmt::Display for WorkField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkField::all()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown work field '{s}'"))
    }
}

/// Mutable fields of a [`SeriesRecord`], as named by locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesField {
    Name,
    Summary,
    Members,
    Authors,
    WorkCount,
    WordCount,
    Status,
    PrimaryWork,
}

impl SeriesField {
    pub const ALL: [SeriesField; 8] = [
        SeriesField::Name,
        SeriesField::Summary,
        SeriesField::Members,
        SeriesField::Authors,
        SeriesField::WorkCount,
        SeriesField::WordCount,
        SeriesField::Status,
        SeriesField::PrimaryWork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesField::Name => "name",
            SeriesField::Summary => "summary",
            SeriesField::Members => "members",
            SeriesField::Authors => "authors",
            SeriesField::WorkCount => "work_count",
            SeriesField::WordCount => "word_count",
            SeriesField::Status => "status",
            SeriesField::PrimaryWork => "primary_work",
        }
    }
}

impl FromStr for SeriesField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SeriesField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown series field '{s}'"))
    }
}

/// Whether `name` can be locked on a subject of the given kind.
pub fn is_lockable_field(kind: SubjectKind, name: &str) -> bool {
    if name == ALL_FIELDS {
        return true;
    }
    match kind {
        SubjectKind::Work => name.parse::<WorkField>().is_ok(),
        SubjectKind::Series => name.parse::<SeriesField>().is_ok(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> WorkMetadata {
        WorkMetadata {
            external_id: "1001".to_string(),
            title: "  The Long Road  ".to_string(),
            authors: vec!["writer_a".to_string(), " ".to_string()],
            summary: "A summary.".to_string(),
            tags: BTreeSet::from(["Angst".to_string(), "  ".to_string()]),
            rating: Rating::Teen,
            word_count: 12_000,
            chapters: ChapterProgress { posted: 3, planned: Some(5) },
            status: CompletionStatus::InProgress,
            language: "English".to_string(),
            published_at: None,
            updated_at: None,
            engagement: Engagement::default(),
            warnings: BTreeSet::new(),
            facets: TagFacets::default(),
        }
    }

    #[test]
    fn test_normalized_trims_and_drops_blanks() {
        let meta = sample_metadata().normalized();
        assert_eq!(meta.title, "The Long Road");
        assert_eq!(meta.authors, vec!["writer_a".to_string()]);
        assert_eq!(meta.tags.len(), 1);
    }

    #[test]
    fn test_normalized_fills_anonymous_author() {
        let mut meta = sample_metadata();
        meta.authors.clear();
        let meta = meta.normalized();
        assert_eq!(meta.authors, vec![ANONYMOUS_AUTHOR.to_string()]);
    }

    #[test]
    fn test_has_value() {
        let mut record = WorkRecord::from_metadata(
            "https://archive.example.org/works/1001",
            sample_metadata().normalized(),
            Utc::now(),
        );
        assert!(record.has_value(WorkField::Title));
        assert!(!record.has_value(WorkField::Warnings));
        assert!(!record.has_value(WorkField::SeriesLink));
        record.title.clear();
        assert!(!record.has_value(WorkField::Title));
    }

    #[test]
    fn test_field_names_roundtrip() {
        for field in WorkField::all() {
            assert_eq!(field.as_str().parse::<WorkField>().unwrap(), field);
        }
        for field in SeriesField::ALL {
            assert_eq!(field.as_str().parse::<SeriesField>().unwrap(), field);
        }
    }

    #[test]
    fn test_is_lockable_field() {
        assert!(is_lockable_field(SubjectKind::Work, "title"));
        assert!(is_lockable_field(SubjectKind::Work, ALL_FIELDS));
        assert!(is_lockable_field(SubjectKind::Series, "members"));
        assert!(!is_lockable_field(SubjectKind::Series, "rating"));
        assert!(!is_lockable_field(SubjectKind::Work, "all"));
    }

    #[test]
    fn test_metadata_defaults_deserialize() {
        let json = r#"{"external_id":"5","title":"T","authors":["a"],"published_at":null,"updated_at":null}"#;
        let meta: WorkMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.rating, Rating::NotRated);
        assert_eq!(meta.status, CompletionStatus::InProgress);
        assert!(meta.facets.relationships.is_empty());
    }
}
