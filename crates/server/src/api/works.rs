use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use shelf_catalog::WorkChange;
use shelf_core::{Tier, WorkField, WorkRecord};

use super::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /works
pub async fn list_works(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<WorkRecord>>> {
    Ok(Json(state.catalog.list_works().await?))
}

/// GET /works/{id}
pub async fn get_work(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkRecord>> {
    let record = state
        .catalog
        .work_by_external_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("work not found: {id}")))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    /// Field name to new value, e.g. `{"title": "New title"}`.
    pub changes: Map<String, Value>,
    pub tier: Tier,
    pub actor_id: String,
}

/// PATCH /works/{id}: a manual edit, subject to the same lock rules as
/// ingestion but at the editor's tier.
pub async fn edit_work(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<EditRequest>,
) -> ApiResult<Json<Value>> {
    if req.changes.is_empty() {
        return Err(ApiError::BadRequest("no changes given".into()));
    }
    let changes = req
        .changes
        .into_iter()
        .map(|(name, value)| {
            let field: WorkField = name.parse().map_err(ApiError::BadRequest)?;
            WorkChange::from_json(field, value)
                .map_err(|e| ApiError::BadRequest(format!("invalid value for '{name}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = state.merge.apply_manual_edit(&id, changes, req.tier, Utc::now()).await?;
    tracing::info!(
        work = %id,
        actor = %req.actor_id,
        tier = %req.tier,
        applied = outcome.applied.len(),
        blocked = outcome.blocked.len(),
        "manual edit"
    );
    Ok(Json(json!({
        "work": outcome.record,
        "action": outcome.action,
        "updated_fields": outcome.applied,
        "blocked_fields": outcome.blocked,
    })))
}
