//! llmserve - Main Entry Point
//!
//! Loads the configured model within its deadline, then serves HTTP until
//! shutdown. A failed load exits the process with a non-zero status.

use llmserve_common::{LlmServeError, MetricsRegistry, Result, ServiceConfig};
use llmserve_server::backend::CandleLoader;
use llmserve_server::http::{self, AppState};
use llmserve_server::{InferenceService, LifecycleManager, SearchPathResolver};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::load()?;

    // Initialize logging
    let level = &config.observability.log_level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "llmserve_server={lvl},llmserve_common={lvl},tower_http={lvl}",
                    lvl = level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting llmserve");
    info!(
        "Configuration loaded: model={}, bind={}:{}, load_timeout={}s",
        config.model.name,
        config.server.bind_address,
        config.server.port,
        config.model.load_timeout_secs
    );

    let addr = config.socket_addr()?;
    let metrics = Arc::new(MetricsRegistry::new()?);

    let resolver = Arc::new(SearchPathResolver::from_config(&config.model));
    let loader = Arc::new(
        CandleLoader::from_config(&config.model)
            .map_err(|e| LlmServeError::config(format!("{:#}", e)))?,
    );

    let lifecycle = Arc::new(LifecycleManager::new(
        config.model.name.clone(),
        config.model.model_type.clone(),
        resolver,
        loader,
        Arc::clone(&metrics),
    ));

    // Load before accepting traffic
    let deadline = config.load_timeout();
    let loading = Arc::clone(&lifecycle);
    let loaded = tokio::task::spawn_blocking(move || loading.load_model(deadline))
        .await
        .map_err(|e| LlmServeError::internal(format!("model load task failed: {}", e)))?;

    if let Err(e) = loaded {
        error!("Failed to load model, exiting: {}", e);
        return Err(e);
    }

    let inference = Arc::new(InferenceService::new(
        Arc::clone(&lifecycle),
        config.generation,
        config.model.prompt_template.clone(),
        Arc::clone(&metrics),
    ));

    let state = Arc::new(AppState::new(
        lifecycle,
        inference,
        metrics,
        config.observability.enable_metrics,
    ));

    http::serve(state, addr).await?;

    info!("llmserve shutdown complete");
    Ok(())
}
