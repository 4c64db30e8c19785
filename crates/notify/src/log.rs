//! Log-only sink used when no webhook is configured.

use std::sync::Arc;

use tracing::info;

use crate::templating::TemplateRenderer;
use crate::traits::{JobNotice, ModerationNotice, ModerationSink, NotificationSink, NotifyError};

/// Writes every notification to the tracing log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogSink {
    renderer: Arc<TemplateRenderer>,
}

impl LogSink {
    pub fn new(renderer: Arc<TemplateRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn notify_requesters(
        &self,
        notice: &JobNotice,
        requesters: &[String],
    ) -> Result<(), NotifyError> {
        let text = self.renderer.job_text(notice)?;
        info!(
            job_id = %notice.job_id,
            status = %notice.status,
            requesters = ?requesters,
            "{text}"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

#[async_trait::async_trait]
impl ModerationSink for LogSink {
    async fn notify_moderation(&self, notice: &ModerationNotice) -> Result<(), NotifyError> {
        let text = self.renderer.moderation_text(notice)?;
        info!(subject = %notice.subject_url, "moderation: {text}");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
