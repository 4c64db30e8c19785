//! Job admission, lookup and the operator reset.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use shelf_queue::{enqueue_or_join, Admission, IngestionJob, JobStatus};

use super::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub url: String,
    pub requester: String,
}

/// POST /jobs: enqueue a subject or join the job already tracking it.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<Admission>)> {
    if req.requester.trim().is_empty() {
        return Err(ApiError::BadRequest("requester must not be empty".into()));
    }
    let admission = enqueue_or_join(state.jobs.as_ref(), &req.url, req.requester.trim(), Utc::now()).await?;
    let status = match admission {
        Admission::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(admission)))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

/// GET /jobs[?status=pending]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<IngestionJob>>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.jobs.list(status).await?))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<IngestionJob>> {
    let job = state
        .jobs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("ingestion job not found: {id}")))?;
    Ok(Json(job))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    /// Also requeue jobs that ended in `error`.
    #[serde(default)]
    pub include_errors: bool,
}

/// POST /jobs/reset-stuck: move processing (and optionally failed) jobs
/// back to pending.
pub async fn reset_stuck_jobs(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ResetRequest>>,
) -> ApiResult<Json<Value>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let reset = state.jobs.reset_to_pending(req.include_errors, Utc::now()).await?;
    info!(reset, include_errors = req.include_errors, "stuck jobs reset to pending");
    Ok(Json(json!({ "reset": reset })))
}
