//! HTTP router construction.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::api;
use crate::state::AppState;

/// Build the application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>, cors_origin: &str) -> Router {
    Router::new()
        .route("/health", get(api::health))
        // Jobs: /reset-stuck must precede /{id}
        .route("/jobs", get(api::list_jobs).post(api::submit_job))
        .route("/jobs/reset-stuck", post(api::reset_stuck_jobs))
        .route("/jobs/{id}", get(api::get_job))
        // Catalog
        .route("/works", get(api::list_works))
        .route("/works/{id}", get(api::get_work).patch(api::edit_work))
        .route("/locks", post(api::set_lock).delete(api::clear_lock))
        .route("/locks/{kind}/{id}", get(api::list_locks))
        .route("/policy", get(api::get_policy).put(api::put_policy))
        .route("/overrides", get(api::list_overrides).post(api::set_override))
        .route("/overrides/{kind}/{id}", axum::routing::delete(api::delete_override))
        .layer(cors_layer(cors_origin))
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::permissive();
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => CorsLayer::permissive().allow_origin(AllowOrigin::exact(value)),
        Err(e) => {
            warn!(origin, error = %e, "invalid CORS origin, allowing any");
            CorsLayer::permissive()
        }
    }
}
