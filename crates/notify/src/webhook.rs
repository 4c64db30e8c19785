//! HTTP webhook delivery for requester and moderation notifications.
//!
//! Posts a JSON envelope `{ "kind", "text", "notice", "requesters" }` to the
//! configured URL. `text` is rendered with [`TemplateRenderer`].
//!
//! Every request is bounded by the client timeout. The URL is never logged.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::Serialize;

use crate::templating::TemplateRenderer;
use crate::traits::{JobNotice, ModerationNotice, ModerationSink, NotificationSink, NotifyError};

#[derive(Debug, Serialize)]
struct Envelope<'a, N: Serialize> {
    kind: &'a str,
    text: String,
    notice: &'a N,
    #[serde(skip_serializing_if = "no_requesters")]
    requesters: &'a [String],
}

fn no_requesters(requesters: &&[String]) -> bool {
    requesters.is_empty()
}

/// Delivers notifications as JSON over HTTP to a configured endpoint.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: Url,
    renderer: Arc<TemplateRenderer>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// `authorization`, when given, is sent as the `Authorization` header
    /// on every request.
    pub fn new(
        url: &str,
        authorization: Option<&str>,
        timeout: Duration,
        renderer: Arc<TemplateRenderer>,
    ) -> Result<Self, NotifyError> {
        let url = Url::parse(url)
            .map_err(|e| NotifyError::Config(format!("invalid webhook URL: {e}")))?;

        let mut headers = HeaderMap::new();
        if let Some(value) = authorization {
            let mut value = HeaderValue::from_str(value)
                .map_err(|e| NotifyError::Config(format!("invalid authorization header: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { url, renderer, client })
    }

    async fn post<N: Serialize + Sync>(&self, envelope: &Envelope<'_, N>) -> Result<(), NotifyError> {
        let response = self.client.post(self.url.clone()).json(envelope).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(kind = envelope.kind, %status, body = %body_text, "webhook returned non-2xx status");
            return Err(NotifyError::Rejected(format!("webhook returned {status}: {body_text}")));
        }

        tracing::debug!(kind = envelope.kind, %status, "webhook notification delivered");
        Ok(())
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify_requesters(
        &self,
        notice: &JobNotice,
        requesters: &[String],
    ) -> Result<(), NotifyError> {
        let envelope = Envelope {
            kind: "job",
            text: self.renderer.job_text(notice)?,
            notice,
            requesters,
        };
        self.post(&envelope).await
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

#[async_trait::async_trait]
impl ModerationSink for WebhookNotifier {
    async fn notify_moderation(&self, notice: &ModerationNotice) -> Result<(), NotifyError> {
        let envelope = Envelope {
            kind: "moderation",
            text: self.renderer.moderation_text(notice)?,
            notice,
            requesters: &[],
        };
        self.post(&envelope).await
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    use super::*;

    fn notice() -> JobNotice {
        JobNotice {
            job_id: Uuid::new_v4(),
            subject_url: "https://archive.example.org/works/5".to_string(),
            status: "done".to_string(),
            result: None,
            message: None,
            finished_at: Utc::now(),
        }
    }

    fn notifier(url: &str, authorization: Option<&str>, timeout: Duration) -> WebhookNotifier {
        WebhookNotifier::new(url, authorization, timeout, Arc::new(TemplateRenderer::new())).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        let result = WebhookNotifier::new(
            "not a url",
            None,
            Duration::from_secs(1),
            Arc::new(TemplateRenderer::new()),
        );
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }

    #[test]
    fn test_new_rejects_invalid_authorization() {
        let result = WebhookNotifier::new(
            "https://hooks.example.org/shelf",
            Some("Bearer bad\nvalue"),
            Duration::from_secs(1),
            Arc::new(TemplateRenderer::new()),
        );
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }

    #[tokio::test]
    async fn test_hung_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept the connection and never answer.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let hook = notifier(&format!("http://{addr}/hook"), None, Duration::from_millis(200));
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            hook.notify_requesters(&notice(), &["u1".to_string()]),
        )
        .await
        .expect("delivery must give up on its own");
        assert!(matches!(outcome, Err(NotifyError::Http(_))));
        server.abort();
    }

    #[tokio::test]
    async fn test_delivery_sends_authorization_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let body_len = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + body_len {
                        break;
                    }
                }
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&request).to_lowercase()
        });

        let hook = notifier(
            &format!("http://{addr}/hook"),
            Some("Bearer shelf-token"),
            Duration::from_secs(5),
        );
        hook.notify_requesters(&notice(), &["u1".to_string()]).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("post /hook"));
        assert!(request.contains("authorization: bearer shelf-token"));
    }

    #[test]
    fn test_envelope_shape() {
        let renderer = TemplateRenderer::new();
        let notice = notice();
        let requesters = vec!["u1".to_string()];
        let envelope = Envelope {
            kind: "job",
            text: renderer.job_text(&notice).unwrap(),
            notice: &notice,
            requesters: &requesters,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kind"], "job");
        assert_eq!(json["requesters"][0], "u1");
        assert_eq!(json["notice"]["status"], "done");
        assert_eq!(json["text"], "Imported https://archive.example.org/works/5 [done]");
    }
}
