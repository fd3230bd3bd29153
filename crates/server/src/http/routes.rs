//! Route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{generate, health, metrics, model_info, AppState};

/// Create the API router
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/model_info", get(model_info))
        .route("/metrics", get(metrics))
}
