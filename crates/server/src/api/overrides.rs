use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use shelf_catalog::Override;
use shelf_core::Tier;

use super::{parse_subject, subject_from_path, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    /// `work:123`, `series:45` or a subject URL.
    pub subject: String,
    pub tier: Tier,
    pub actor_id: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /overrides
pub async fn set_override(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OverrideRequest>,
) -> ApiResult<(StatusCode, Json<Override>)> {
    let subject = parse_subject(&req.subject)?;
    let entry = state
        .gate
        .set_override(&subject, req.tier, &req.actor_id, req.note, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /overrides
pub async fn list_overrides(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Override>>> {
    Ok(Json(state.gate.list_overrides().await?))
}

#[derive(Debug, Deserialize)]
pub struct ActorParams {
    pub tier: Tier,
    pub actor_id: String,
}

/// DELETE /overrides/{kind}/{id}?tier=mod&actor_id=...
pub async fn delete_override(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
    Query(actor): Query<ActorParams>,
) -> ApiResult<Json<Value>> {
    let subject = subject_from_path(&kind, &id)?;
    let removed = state.gate.clear_override(&subject, actor.tier, &actor.actor_id).await?;
    Ok(Json(json!({ "subject": subject.to_string(), "removed": removed })))
}
