//! Outbound notifications for the ingestion pipeline.
//!
//! This crate provides:
//! - `NotificationSink` / `ModerationSink` traits the pipeline calls into
//! - A webhook implementation of both, plus log-only and recording sinks
//! - Minijinja rendering of the human-readable message text

pub mod log;
pub mod recording;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use log::LogSink;
pub use recording::RecordingSink;
pub use templating::TemplateRenderer;
pub use traits::{JobNotice, ModerationNotice, ModerationSink, NotificationSink, NotifyError};
pub use webhook::WebhookNotifier;
