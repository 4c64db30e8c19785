use async_trait::async_trait;
use thiserror::Error;

use shelf_core::{SeriesMetadata, WorkMetadata};

/// Classified fetch failures. The message is what the requester sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found: the work was deleted or never existed")]
    NotFound,

    #[error("access restricted: the page requires a login or is locked")]
    Forbidden,

    #[error("the site is rate limiting us, try again later")]
    SiteDefense,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("could not read the fetched page: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::NotFound => "not-found",
            FetchError::Forbidden => "forbidden",
            FetchError::SiteDefense => "site-defense",
            FetchError::Connection(_) => "connection",
            FetchError::Decode(_) => "decode",
        }
    }
}

/// Opaque fetch-and-parse of one subject page.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_work(&self, url: &str) -> Result<WorkMetadata, FetchError>;

    async fn fetch_series(&self, url: &str) -> Result<SeriesMetadata, FetchError>;
}
