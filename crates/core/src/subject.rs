//! Subjects: the external works and series the pipeline ingests.
//!
//! A [`Subject`] pairs the canonical URL of an external page with the
//! [`SubjectKey`] used to key records, locks and eligibility overrides.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SubjectError;

/// Whether a subject is a single work or a collection of works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Work,
    Series,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Work => "work",
            SubjectKind::Series => "series",
        }
    }

    /// Path segment used by the external site for this kind.
    fn path_segment(&self) -> &'static str {
        match self {
            SubjectKind::Work => "works",
            SubjectKind::Series => "series",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = SubjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work" | "works" => Ok(SubjectKind::Work),
            "series" => Ok(SubjectKind::Series),
            other => Err(SubjectError::InvalidKey(other.to_string())),
        }
    }
}

/// Stable key of a work or series: kind plus the external identifier.
///
/// Rendered as `work:123` / `series:45` when stored as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    pub kind: SubjectKind,
    pub id: String,
}

impl SubjectKey {
    pub fn work(id: impl Into<String>) -> Self {
        Self { kind: SubjectKind::Work, id: id.into() }
    }

    pub fn series(id: impl Into<String>) -> Self {
        Self { kind: SubjectKind::Series, id: id.into() }
    }

    /// Text form used as a storage key.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for SubjectKey {
    type Err = SubjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| SubjectError::InvalidKey(s.to_string()))?;
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(SubjectError::InvalidKey(s.to_string()));
        }
        Ok(Self { kind: kind.parse()?, id: id.to_string() })
    }
}

/// A parsed, canonicalised subject URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Canonical URL: `{scheme}://{host}/works/{id}` or `.../series/{id}`.
    pub url: String,
    pub key: SubjectKey,
}

impl Subject {
    /// Parse a raw URL as submitted by a requester.
    ///
    /// Chapter paths, query strings and fragments are dropped so that every
    /// spelling of the same page maps to one job row.
    pub fn parse(raw: &str) -> Result<Self, SubjectError> {
        let trimmed = raw.trim();
        let parsed = Url::parse(trimmed).map_err(|e| SubjectError::InvalidUrl {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SubjectError::InvalidUrl {
                url: trimmed.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        let host = parsed.host_str().ok_or_else(|| SubjectError::InvalidUrl {
            url: trimmed.to_string(),
            reason: "missing host".to_string(),
        })?;

        let segments: Vec<&str> = parsed
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        for pair in segments.windows(2) {
            let kind = match pair[0] {
                "works" => SubjectKind::Work,
                "series" => SubjectKind::Series,
                _ => continue,
            };
            let id = pair[1];
            if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
                let key = SubjectKey { kind, id: id.to_string() };
                return Ok(Self {
                    url: canonical_url(parsed.scheme(), host, &key),
                    key,
                });
            }
        }

        Err(SubjectError::Unrecognised(trimmed.to_string()))
    }

    pub fn kind(&self) -> SubjectKind {
        self.key.kind
    }
}

fn canonical_url(scheme: &str, host: &str, key: &SubjectKey) -> String {
    format!("{}://{}/{}/{}", scheme, host, key.kind.path_segment(), key.id)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_work_url() {
        let s = Subject::parse("https://archive.example.org/works/123456").unwrap();
        assert_eq!(s.key, SubjectKey::work("123456"));
        assert_eq!(s.url, "https://archive.example.org/works/123456");
        assert_eq!(s.kind(), SubjectKind::Work);
    }

    #[test]
    fn test_parse_strips_chapters_and_query() {
        let s = Subject::parse(
            "https://Archive.Example.org/works/42/chapters/9001?view_adult=true#main",
        )
        .unwrap();
        assert_eq!(s.url, "https://archive.example.org/works/42");
    }

    #[test]
    fn test_parse_collection_scoped_work() {
        let s = Subject::parse("https://archive.example.org/collections/fest/works/77").unwrap();
        assert_eq!(s.key, SubjectKey::work("77"));
    }

    #[test]
    fn test_parse_series_url() {
        let s = Subject::parse("http://archive.example.org/series/9").unwrap();
        assert_eq!(s.key, SubjectKey::series("9"));
        assert_eq!(s.url, "http://archive.example.org/series/9");
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        assert!(matches!(
            Subject::parse("https://archive.example.org/users/someone"),
            Err(SubjectError::Unrecognised(_))
        ));
        assert!(matches!(
            Subject::parse("https://archive.example.org/works/new"),
            Err(SubjectError::Unrecognised(_))
        ));
        assert!(matches!(
            Subject::parse("not a url"),
            Err(SubjectError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Subject::parse("ftp://archive.example.org/works/1"),
            Err(SubjectError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_subject_key_text_form() {
        let key = SubjectKey::series("45");
        assert_eq!(key.storage_key(), "series:45");
        assert_eq!("series:45".parse::<SubjectKey>().unwrap(), key);
        assert_eq!("works:7".parse::<SubjectKey>().unwrap(), SubjectKey::work("7"));
        assert!("series:".parse::<SubjectKey>().is_err());
        assert!("chapter:1".parse::<SubjectKey>().is_err());
        assert!("work:abc".parse::<SubjectKey>().is_err());
    }
}
