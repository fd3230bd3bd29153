//! HTTP server for inference
//!
//! Exposes `/health`, `/generate`, `/model_info` and `/metrics`.

mod handlers;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use llmserve_common::Result;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use handlers::{AppState, GenerateResponse, HealthResponse};
pub use routes::api_routes;

/// Build the application router
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("API endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /generate - Text generation");
    info!("  GET  /model_info - Loaded model details");
    if state.metrics_enabled {
        info!("  GET  /metrics - Prometheus metrics");
    }

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
