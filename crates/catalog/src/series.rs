//! Choosing the representative ("primary") work of a series.

use chrono::{DateTime, Utc};

use shelf_core::WorkRecord;

/// What the selector needs to know about one member work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingWork {
    pub external_id: String,
    pub published_at: Option<DateTime<Utc>>,
    pub is_sequel: bool,
    pub is_prequel: bool,
}

impl SiblingWork {
    /// Derive the sequel/prequel flags from the work's free-text tags.
    pub fn from_record(record: &WorkRecord) -> Self {
        let tagged = |needle: &str| {
            record
                .tags
                .iter()
                .chain(record.facets.freeform.iter())
                .any(|t| t.to_lowercase().contains(needle))
        };
        Self {
            external_id: record.external_id.clone(),
            published_at: record.published_at,
            is_sequel: tagged("sequel"),
            is_prequel: tagged("prequel"),
        }
    }

    fn is_continuation(&self) -> bool {
        self.is_sequel || self.is_prequel
    }
}

pub struct PrimaryWorkSelector;

impl PrimaryWorkSelector {
    /// Index of the primary work, or `None` for an empty list.
    ///
    /// Candidates are the works tagged neither sequel nor prequel (every
    /// work if that leaves none). The earliest published candidate wins;
    /// unknown dates sort last and ties keep list order.
    pub fn primary_index(works: &[SiblingWork]) -> Option<usize> {
        let standalone: Vec<usize> = (0..works.len())
            .filter(|&i| !works[i].is_continuation())
            .collect();
        let candidates = if standalone.is_empty() {
            (0..works.len()).collect()
        } else {
            standalone
        };

        // min_by_key returns the first of equal keys.
        candidates
            .into_iter()
            .min_by_key(|&i| match works[i].published_at {
                Some(at) => (0, Some(at)),
                None => (1, None),
            })
    }

    /// One flag per input work; exactly one is true for a non-empty input.
    pub fn select(works: &[SiblingWork]) -> Vec<bool> {
        let primary = Self::primary_index(works);
        (0..works.len()).map(|i| Some(i) == primary).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sibling(id: &str, day: Option<u32>, sequel: bool, prequel: bool) -> SiblingWork {
        SiblingWork {
            external_id: id.to_string(),
            published_at: day.map(|d| Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()),
            is_sequel: sequel,
            is_prequel: prequel,
        }
    }

    #[test]
    fn test_earliest_standalone_is_primary() {
        let works = vec![
            sibling("1", Some(1), false, false),
            sibling("2", Some(5), false, false),
            sibling("3", Some(9), true, false),
            sibling("4", Some(12), false, false),
        ];
        assert_eq!(PrimaryWorkSelector::select(&works), vec![true, false, false, false]);
    }

    #[test]
    fn test_sequel_excluded_even_if_earliest() {
        let works = vec![
            sibling("1", Some(3), false, false),
            sibling("2", Some(1), true, false),
            sibling("3", Some(2), false, true),
        ];
        assert_eq!(PrimaryWorkSelector::primary_index(&works), Some(0));
    }

    #[test]
    fn test_all_continuations_fall_back_to_all() {
        let works = vec![
            sibling("1", Some(4), true, false),
            sibling("2", Some(2), false, true),
        ];
        assert_eq!(PrimaryWorkSelector::primary_index(&works), Some(1));
    }

    #[test]
    fn test_ties_and_missing_dates() {
        let works = vec![
            sibling("1", None, false, false),
            sibling("2", Some(7), false, false),
            sibling("3", Some(7), false, false),
        ];
        assert_eq!(PrimaryWorkSelector::primary_index(&works), Some(1));

        let undated = vec![sibling("1", None, false, false), sibling("2", None, false, false)];
        assert_eq!(PrimaryWorkSelector::select(&undated), vec![true, false]);
    }

    #[test]
    fn test_exactly_one_primary() {
        assert!(PrimaryWorkSelector::select(&[]).is_empty());
        for n in 1..6u32 {
            let works: Vec<SiblingWork> = (1..=n)
                .map(|d| sibling(&d.to_string(), Some(10 - d), d % 2 == 0, false))
                .collect();
            let flags = PrimaryWorkSelector::select(&works);
            assert_eq!(flags.iter().filter(|p| **p).count(), 1);
        }
    }

    #[test]
    fn test_flags_from_tags_are_case_insensitive() {
        let meta: shelf_core::WorkMetadata = serde_json::from_value(serde_json::json!({
            "external_id": "9",
            "title": "Part Two",
            "authors": ["w"],
            "tags": ["SEQUEL to Part One"],
            "published_at": null,
            "updated_at": null,
            "facets": { "freeform": ["Prequel-ish"] }
        }))
        .unwrap();
        let record = WorkRecord::from_metadata("https://h.org/works/9", meta, Utc::now());
        let sibling = SiblingWork::from_record(&record);
        assert!(sibling.is_sequel);
        assert!(sibling.is_prequel);
    }
}
