//! Series (collection) ingestion.
//!
//! Fetch the collection page, then up to `series_member_limit` member works.
//! Members are gated one by one unless the series itself carries an
//! override. Accepted members are merged with their primary flag and series
//! link, and the series record is aggregated from the collection page.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shelf_catalog::{PrimaryWorkSelector, SiblingWork, Verdict};
use shelf_core::{SeriesMetadata, SeriesRecord, Subject, SubjectKind, Tier, WorkField, WorkRecord};
use shelf_queue::{Finalization, IngestionJob};

use crate::error::IngestError;
use crate::worker::IngestWorker;

/// A member that did not make it into the catalog.
#[derive(Debug, Clone)]
struct MemberFailure {
    url: String,
    reason: String,
    rejected: bool,
}

impl MemberFailure {
    fn to_json(&self) -> Value {
        json!({ "url": self.url, "reason": self.reason, "rejected": self.rejected })
    }
}

impl IngestWorker {
    pub(crate) async fn ingest_series(
        &mut self,
        job: &IngestionJob,
        subject: &Subject,
    ) -> Result<Finalization, IngestError> {
        self.pace_series_page().await;
        let page = self.deps.fetcher.fetch_series(&subject.url).await?;

        let series_override = self.deps.gate.has_override(&subject.key).await?;
        let limit = self.settings.series_member_limit;
        let mut accepted: Vec<(Subject, shelf_core::WorkMetadata)> = Vec::new();
        let mut failures: Vec<MemberFailure> = Vec::new();

        for raw in page.member_urls.iter().take(limit) {
            let member = match Subject::parse(raw) {
                Ok(member) if member.kind() == SubjectKind::Work => member,
                Ok(_) => {
                    failures.push(MemberFailure {
                        url: raw.clone(),
                        reason: "not a work url".to_string(),
                        rejected: false,
                    });
                    continue;
                }
                Err(e) => {
                    failures.push(MemberFailure { url: raw.clone(), reason: e.to_string(), rejected: false });
                    continue;
                }
            };

            let meta = match self.fetch_work(&member.url).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(job_id = %job.id, member = %member.url, error = %e, "series member fetch failed");
                    failures.push(MemberFailure { url: member.url, reason: e.to_string(), rejected: false });
                    continue;
                }
            };

            let verdict = if series_override {
                Verdict::Overridden
            } else {
                self.deps.gate.check(&member.key, &meta.facets).await?
            };
            match verdict {
                Verdict::Rejected { reason } => failures.push(MemberFailure {
                    url: member.url,
                    reason,
                    rejected: true,
                }),
                Verdict::Accepted | Verdict::Overridden => accepted.push((member, meta)),
            }
        }

        let attempted = accepted.len() + failures.len();
        let rejected = failures.iter().filter(|f| f.rejected).count();
        if self.settings.series_rejection.rejects(attempted, rejected) {
            let reason = failures
                .iter()
                .filter(|f| f.rejected)
                .map(|f| format!("{}: {}", f.url, f.reason))
                .collect::<Vec<_>>()
                .join("; ");
            self.report_rejection(job, &reason).await;
            return Ok(Finalization::rejected(reason));
        }
        if attempted > 0 && accepted.is_empty() {
            let reason = failures
                .iter()
                .map(|f| format!("{}: {}", f.url, f.reason))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(IngestError::Invalid(format!("no series member could be ingested ({reason})")));
        }

        let series_id = if page.external_id.is_empty() {
            subject.key.id.clone()
        } else {
            page.external_id.clone()
        };
        let now = Utc::now();
        let mut members: Vec<WorkRecord> = accepted
            .into_iter()
            .map(|(member, meta)| {
                let mut record = WorkRecord::from_metadata(&member.url, meta, now);
                record.series_link = Some(series_id.clone());
                record
            })
            .collect();

        let siblings: Vec<SiblingWork> = members.iter().map(SiblingWork::from_record).collect();
        for (record, primary) in members.iter_mut().zip(PrimaryWorkSelector::select(&siblings)) {
            record.is_primary_in_series = primary;
        }
        let primary = members.iter().find(|m| m.is_primary_in_series).cloned();

        let fields: Vec<WorkField> = WorkField::all().collect();
        let mut merged = Vec::with_capacity(members.len());
        for record in members {
            let outcome = self
                .deps
                .merge
                .merge_work(record, &fields, Tier::AUTOMATED, now)
                .await?;
            merged.push(json!({
                "work_id": outcome.record.external_id,
                "title": outcome.record.title,
                "is_primary": outcome.record.is_primary_in_series,
                "action": outcome.action,
                "blocked_fields": outcome.blocked,
            }));
        }

        let series = aggregate_series(&series_id, &subject.url, page, primary.as_ref(), now);
        let (series, action) = self
            .deps
            .merge
            .merge_series(series, Tier::AUTOMATED, now)
            .await?;
        info!(
            job_id = %job.id,
            series = %series.external_id,
            members = merged.len(),
            failures = failures.len(),
            "series ingested"
        );

        Ok(Finalization::series_done(json!({
            "kind": "series",
            "series_id": series.external_id,
            "title": series.name,
            "action": action,
            "primary_work_id": series.primary_work_id,
            "members": merged,
            "failures": failures.iter().map(MemberFailure::to_json).collect::<Vec<_>>(),
        })))
    }
}

/// Build the series record from its collection page. Member ids cover every
/// listed member, not only the fetched ones.
fn aggregate_series(
    series_id: &str,
    url: &str,
    page: SeriesMetadata,
    primary: Option<&WorkRecord>,
    now: chrono::DateTime<Utc>,
) -> SeriesRecord {
    let member_ids: Vec<String> = page
        .member_urls
        .iter()
        .filter_map(|u| Subject::parse(u).ok())
        .filter(|s| s.kind() == SubjectKind::Work)
        .map(|s| s.key.id)
        .collect();
    let summary = if page.summary.trim().is_empty() {
        primary.map(|p| p.summary.clone()).unwrap_or_default()
    } else {
        page.summary
    };
    let authors = if page.authors.is_empty() {
        primary.map(|p| p.authors.clone()).unwrap_or_default()
    } else {
        page.authors
    };
    SeriesRecord {
        id: Uuid::new_v4(),
        external_id: series_id.to_string(),
        url: url.to_string(),
        name: page.name.trim().to_string(),
        summary,
        work_count: page.work_count.max(member_ids.len() as u32),
        member_ids,
        authors,
        word_count: page.word_count,
        status: page.status,
        primary_work_id: primary.map(|p| p.external_id.clone()),
        created_at: now,
        last_merged_at: now,
    }
}

#[cfg(test)]
mod tests {
    use shelf_core::{CompletionStatus, WorkMetadata};

    use super::*;

    fn page(summary: &str) -> SeriesMetadata {
        SeriesMetadata {
            external_id: "77".into(),
            name: " Road Trip Verse ".into(),
            summary: summary.into(),
            authors: Vec::new(),
            member_urls: vec![
                "https://archive.example.org/works/1".into(),
                "https://archive.example.org/series/2".into(),
                "https://archive.example.org/works/3/chapters/9".into(),
            ],
            work_count: 0,
            word_count: 90_000,
            status: CompletionStatus::Complete,
        }
    }

    fn primary() -> WorkRecord {
        let meta: WorkMetadata = serde_json::from_value(json!({
            "external_id": "1",
            "title": "Part One",
            "authors": ["writer"],
            "summary": "Where it starts.",
            "published_at": null,
            "updated_at": null
        }))
        .unwrap();
        WorkRecord::from_metadata("https://archive.example.org/works/1", meta, Utc::now())
    }

    #[test]
    fn test_aggregate_takes_primary_summary_when_empty() {
        let p = primary();
        let series = aggregate_series("77", "https://archive.example.org/series/77", page(""), Some(&p), Utc::now());
        assert_eq!(series.summary, "Where it starts.");
        assert_eq!(series.authors, vec!["writer".to_string()]);
        assert_eq!(series.member_ids, vec!["1".to_string(), "3".to_string()]);
        assert_eq!(series.work_count, 2);
        assert_eq!(series.name, "Road Trip Verse");
        assert_eq!(series.primary_work_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_aggregate_keeps_own_summary() {
        let series = aggregate_series("77", "u", page("Own words."), None, Utc::now());
        assert_eq!(series.summary, "Own words.");
        assert!(series.primary_work_id.is_none());
    }
}
