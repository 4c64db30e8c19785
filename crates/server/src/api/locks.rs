//! Field locks and the global lock policy.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use shelf_catalog::{FieldLock, GlobalLockPolicy};
use shelf_core::Tier;

use super::{parse_subject, subject_from_path, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    pub subject: String,
    /// A field name, or `ALL` for every field.
    pub field: String,
    pub tier: Tier,
    pub actor_id: String,
}

/// POST /locks
pub async fn set_lock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LockRequest>,
) -> ApiResult<(StatusCode, Json<FieldLock>)> {
    let subject = parse_subject(&req.subject)?;
    let lock = state
        .locks
        .set_lock(&subject, &req.field, req.tier, &req.actor_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(lock)))
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub subject: String,
    pub field: String,
    pub actor_id: String,
}

/// DELETE /locks
pub async fn clear_lock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UnlockRequest>,
) -> ApiResult<Json<Value>> {
    let subject = parse_subject(&req.subject)?;
    let removed = state
        .locks
        .clear_lock(&subject, &req.field, &req.actor_id, Utc::now())
        .await?;
    Ok(Json(json!({ "removed": removed })))
}

/// GET /locks/{kind}/{id}: active locks plus the full event history.
pub async fn list_locks(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let subject = subject_from_path(&kind, &id)?;
    let active = state.locks.active(&subject).await?;
    let history = state.locks.history(&subject).await?;
    Ok(Json(json!({
        "subject": subject.to_string(),
        "active": active,
        "history": history,
    })))
}

/// GET /policy
pub async fn get_policy(State(state): State<Arc<AppState>>) -> ApiResult<Json<GlobalLockPolicy>> {
    let policy = state.locks.global_policy().await?;
    Ok(Json(policy.as_ref().clone()))
}

#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub fields: BTreeSet<String>,
    #[serde(default = "default_respects_global")]
    pub automated_respects_global: bool,
    pub tier: Tier,
    pub actor_id: String,
}

fn default_respects_global() -> bool {
    true
}

/// PUT /policy
pub async fn put_policy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PolicyRequest>,
) -> ApiResult<Json<GlobalLockPolicy>> {
    let policy = state
        .locks
        .set_global_policy(req.fields, req.automated_respects_global, req.tier, &req.actor_id, Utc::now())
        .await?;
    Ok(Json(policy))
}
