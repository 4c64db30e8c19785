//! Durable ingestion job queue.
//!
//! One [`IngestionJob`] per subject URL; admission is insert-or-join on the
//! store's uniqueness constraint. Terminal jobs fan out to their subscribers
//! once and are purged by the [`Reaper`].

pub mod admission;
pub mod error;
pub mod fanout;
pub mod job;
pub mod reaper;
pub mod store;

pub use admission::{enqueue_or_join, Admission};
pub use error::QueueError;
pub use fanout::{release_subscribers, FanoutPolicy, FanoutReport};
pub use job::{BatchKind, Finalization, IngestionJob, JobStatus, NewJob};
pub use reaper::{ReapReport, Reaper};
pub use store::{JobStore, MemoryJobStore, PgJobStore};
