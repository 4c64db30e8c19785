//! [`Fetcher`] backed by an external fetch-and-parse service.
//!
//! `GET {base}/works?url=...` and `GET {base}/series?url=...` return the
//! normalized metadata as JSON. Upstream statuses are forwarded as-is and
//! mapped onto [`FetchError`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use shelf_core::{SeriesMetadata, WorkMetadata};

use crate::fetcher::{FetchError, Fetcher};

pub struct HttpFetcher {
    client: Client,
    base: Url,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let base = Url::parse(base_url)
            .map_err(|e| FetchError::Connection(format!("invalid fetcher url '{base_url}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Connection(e.to_string()))?;
        Ok(Self { client, base })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, subject_url: &str) -> Result<T, FetchError> {
        let endpoint = self
            .base
            .join(path)
            .map_err(|e| FetchError::Connection(e.to_string()))?;
        debug!(%endpoint, subject = subject_url, "fetching");

        let response = self
            .client
            .get(endpoint)
            .query(&[("url", subject_url)])
            .send()
            .await
            .map_err(|e| FetchError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

pub(crate) fn classify_status(status: StatusCode) -> FetchError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Forbidden,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => FetchError::SiteDefense,
        other => FetchError::Connection(format!("upstream returned {other}")),
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_work(&self, url: &str) -> Result<WorkMetadata, FetchError> {
        self.get("works", url).await
    }

    async fn fetch_series(&self, url: &str) -> Result<SeriesMetadata, FetchError> {
        self.get("series", url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::NOT_FOUND), FetchError::NotFound);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), FetchError::Forbidden);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FetchError::SiteDefense);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), FetchError::SiteDefense);
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            FetchError::Connection(_)
        ));
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpFetcher::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpFetcher::new("http://localhost:8088/", Duration::from_secs(1)).is_ok());
    }
}
