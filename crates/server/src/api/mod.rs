//! HTTP handlers and the shared error type.
//!
//! Authentication is out of scope: callers pass the acting `actor_id` and
//! `tier`, and the catalog services enforce tier rules.

mod health;
mod jobs;
mod locks;
mod overrides;
mod works;

pub use health::health;
pub use jobs::{get_job, list_jobs, reset_stuck_jobs, submit_job};
pub use locks::{clear_lock, get_policy, list_locks, put_policy, set_lock};
pub use overrides::{delete_override, list_overrides, set_override};
pub use works::{edit_work, get_work, list_works};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use shelf_catalog::CatalogError;
use shelf_core::{StoreError, Subject, SubjectError, SubjectKey};
use shelf_queue::QueueError;

pub(crate) type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => {
                error!(error = %m, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => ApiError::NotFound(format!("not found: {m}")),
            StoreError::Conflict(m) => ApiError::Conflict(m),
            StoreError::InvalidTransition(m) => ApiError::Conflict(m),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SubjectError> for ApiError {
    fn from(e: SubjectError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Subject(e) => e.into(),
            QueueError::Store(e) => e.into(),
            e @ QueueError::Contention(..) => ApiError::Conflict(e.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            e @ CatalogError::Forbidden { .. } => ApiError::Forbidden(e.to_string()),
            e @ CatalogError::UnknownField { .. } => ApiError::BadRequest(e.to_string()),
            CatalogError::Store(e) => e.into(),
        }
    }
}

/// Accept either a stored key (`work:123`) or a subject URL.
pub(crate) fn parse_subject(raw: &str) -> Result<SubjectKey, ApiError> {
    if let Ok(key) = raw.parse::<SubjectKey>() {
        return Ok(key);
    }
    Ok(Subject::parse(raw)?.key)
}

/// Key from `/{kind}/{id}` path segments.
pub(crate) fn subject_from_path(kind: &str, id: &str) -> Result<SubjectKey, ApiError> {
    Ok(format!("{kind}:{id}").parse::<SubjectKey>()?)
}
