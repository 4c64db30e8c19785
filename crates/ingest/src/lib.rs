//! The paced ingestion worker: fetch, gate, merge, finalize.

pub mod error;
pub mod fetcher;
pub mod http_fetcher;
pub mod pacing;
mod series;
pub mod worker;

pub use error::IngestError;
pub use fetcher::{FetchError, Fetcher};
pub use http_fetcher::HttpFetcher;
pub use pacing::{InterJobDelay, Pacer, PacingProfile, RateBudget};
pub use worker::{IngestWorker, SeriesRejectionPolicy, WorkerDeps, WorkerSettings};
