//! In-memory sink that records every delivery, for tests and dry runs.

use std::sync::Mutex;

use crate::traits::{JobNotice, ModerationNotice, ModerationSink, NotificationSink, NotifyError};

/// One requester-notification fan-out.
#[derive(Debug, Clone)]
pub struct RecordedJobNotice {
    pub notice: JobNotice,
    pub requesters: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    jobs: Mutex<Vec<RecordedJobNotice>>,
    moderation: Mutex<Vec<ModerationNotice>>,
    fail_deliveries: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records and then reports every delivery as failed.
    pub fn failing() -> Self {
        Self { fail_deliveries: true, ..Self::default() }
    }

    pub fn job_notices(&self) -> Vec<RecordedJobNotice> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn moderation_notices(&self) -> Vec<ModerationNotice> {
        self.moderation.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of notifications each requester received, across all jobs.
    pub fn deliveries_to(&self, requester: &str) -> usize {
        self.job_notices()
            .iter()
            .filter(|r| r.requesters.iter().any(|q| q == requester))
            .count()
    }

    fn outcome(&self) -> Result<(), NotifyError> {
        if self.fail_deliveries {
            Err(NotifyError::Rejected("recording sink set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_requesters(
        &self,
        notice: &JobNotice,
        requesters: &[String],
    ) -> Result<(), NotifyError> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedJobNotice { notice: notice.clone(), requesters: requesters.to_vec() });
        self.outcome()
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

#[async_trait::async_trait]
impl ModerationSink for RecordingSink {
    async fn notify_moderation(&self, notice: &ModerationNotice) -> Result<(), NotifyError> {
        self.moderation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice.clone());
        self.outcome()
    }

    fn channel_name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_records_job_notices() {
        let sink = RecordingSink::new();
        let notice = JobNotice {
            job_id: Uuid::new_v4(),
            subject_url: "https://archive.example.org/works/1".to_string(),
            status: "done".to_string(),
            result: None,
            message: None,
            finished_at: Utc::now(),
        };
        sink.notify_requesters(&notice, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(sink.job_notices().len(), 1);
        assert_eq!(sink.deliveries_to("a"), 1);
        assert_eq!(sink.deliveries_to("c"), 0);
    }

    #[tokio::test]
    async fn test_failing_sink_still_records() {
        let sink = RecordingSink::failing();
        let notice = ModerationNotice {
            subject_url: "https://archive.example.org/works/2".to_string(),
            reason: "r".to_string(),
            requester: None,
            detected_at: Utc::now(),
        };
        assert!(sink.notify_moderation(&notice).await.is_err());
        assert_eq!(sink.moderation_notices().len(), 1);
    }
}
