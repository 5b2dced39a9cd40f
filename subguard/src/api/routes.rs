use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde_json::json;

use crate::metrics::{MetricsCollector, MetricsSnapshot};

/// `/`, `/health` and `/metrics` all serve the same snapshot.
pub fn router(metrics: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/health", get(status))
        .route("/metrics", get(status))
        .fallback(not_found)
        .with_state(metrics)
}

async fn status(State(metrics): State<Arc<MetricsCollector>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}
