//! Liveness check backed by a database round-trip

use axum::{extract::Extension, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::error;

use crate::common::AppState;

pub fn health_routes() -> Router {
    Router::new().route("/health", get(health))
}

/// GET /health
async fn health(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
) -> (StatusCode, Json<Value>) {
    let db = state_lock.read().await.db.clone();

    match sqlx::query("SELECT 1").execute(&db).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
