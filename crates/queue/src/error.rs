//! Queue error types.

use thiserror::Error;

use shelf_core::{StoreError, SubjectError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Subject(#[from] SubjectError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The row kept disappearing between conflict and lookup.
    #[error("admission for {0} did not settle after {1} attempts")]
    Contention(String, u32),
}
