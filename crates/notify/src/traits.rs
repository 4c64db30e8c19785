//! Sink traits the pipeline notifies through, and shared error types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Delivery rejected: {0}")]
    Rejected(String),
}

/// Terminal outcome of one ingestion job, sent to everyone subscribed to it.
#[derive(Debug, Clone, Serialize)]
pub struct JobNotice {
    pub job_id: Uuid,
    pub subject_url: String,
    /// Terminal job status (`done`, `series-done`, `error`, `rejected`).
    pub status: String,
    /// Success payload, when the job succeeded.
    pub result: Option<serde_json::Value>,
    /// Error or rejection text, when it did not.
    pub message: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl JobNotice {
    pub fn is_success(&self) -> bool {
        self.message.is_none()
    }
}

/// A content-policy rejection routed to moderators.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationNotice {
    pub subject_url: String,
    pub reason: String,
    /// Who asked for the subject, when known.
    pub requester: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Delivers job outcomes to the requesters that subscribed to a job.
///
/// The pipeline calls this at most once per job.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_requesters(
        &self,
        notice: &JobNotice,
        requesters: &[String],
    ) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "webhook", "log").
    fn channel_name(&self) -> &str;
}

/// Receives eligibility rejections for human review.
#[async_trait::async_trait]
pub trait ModerationSink: Send + Sync {
    async fn notify_moderation(&self, notice: &ModerationNotice) -> Result<(), NotifyError>;

    fn channel_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_notice_success_flag() {
        let mut notice = JobNotice {
            job_id: Uuid::new_v4(),
            subject_url: "https://archive.example.org/works/1".to_string(),
            status: "done".to_string(),
            result: Some(serde_json::json!({"title": "A"})),
            message: None,
            finished_at: Utc::now(),
        };
        assert!(notice.is_success());
        notice.status = "error".to_string();
        notice.message = Some("not found".to_string());
        assert!(!notice.is_success());
    }

    #[test]
    fn test_moderation_notice_serializes() {
        let notice = ModerationNotice {
            subject_url: "https://archive.example.org/works/2".to_string(),
            reason: "pairing 'Castiel/Someone Else'".to_string(),
            requester: Some("user-7".to_string()),
            detected_at: Utc::now(),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["requester"], "user-7");
        assert!(json["reason"].as_str().unwrap().contains("Castiel"));
    }
}
