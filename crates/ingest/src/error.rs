use thiserror::Error;

use shelf_catalog::CatalogError;
use shelf_core::{StoreError, SubjectError};

use crate::fetcher::FetchError;

/// Anything that ends a job as `error`.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Subject(#[from] SubjectError),

    #[error("{0}")]
    Invalid(String),
}
