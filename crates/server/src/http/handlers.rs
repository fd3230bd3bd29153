//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info_span;
use uuid::Uuid;

use crate::health::HealthReporter;
use crate::inference::{GenerationRequest, GenerationResult, InferenceService};
use crate::lifecycle::LifecycleManager;
use llmserve_common::{LlmServeError, MetricsRegistry};

/// Shared application state
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub inference: Arc<InferenceService>,
    pub health: HealthReporter,
    pub metrics: Arc<MetricsRegistry>,
    pub metrics_enabled: bool,
}

impl AppState {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        inference: Arc<InferenceService>,
        metrics: Arc<MetricsRegistry>,
        metrics_enabled: bool,
    ) -> Self {
        let health = HealthReporter::new(Arc::clone(&lifecycle));
        Self {
            lifecycle,
            inference,
            health,
            metrics,
            metrics_enabled,
        }
    }
}

/// Health check endpoint
///
/// Always 200 while the process is up. `status` reflects readiness:
/// `healthy` once the model is `Ready`, `unavailable` otherwise, with the
/// exact phase in `state`.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.health.snapshot();
    let model_loaded = snapshot.model_loaded();

    let response = HealthResponse {
        status: if model_loaded { "healthy" } else { "unavailable" }.to_string(),
        model_loaded,
        model_name: snapshot.model_name,
        state: snapshot.state.to_string(),
        detail: snapshot.detail,
    };
    (StatusCode::OK, Json(response))
}

/// Text generation endpoint
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return LlmServeError::validation(rejection.body_text()).into_response();
        }
    };

    let request_id = Uuid::new_v4();
    let span = info_span!("generate", %request_id);
    let service = Arc::clone(&state.inference);

    // Generation blocks for the whole backend call; the span is entered on
    // the blocking thread so its logs carry the request id
    let outcome =
        tokio::task::spawn_blocking(move || span.in_scope(|| service.generate(&request))).await;

    match outcome {
        Ok(Ok(result)) => (StatusCode::OK, Json(GenerateResponse::from(result))).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => {
            LlmServeError::internal(format!("generation task failed: {}", e)).into_response()
        }
    }
}

/// Loaded model details
pub async fn model_info(State(state): State<Arc<AppState>>) -> Response {
    match state.lifecycle.handle() {
        Ok(handle) => (StatusCode::OK, Json(handle.info().clone())).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Prometheus exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    if !state.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    match state.metrics.gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

// Request/Response types

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub model_name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub prompt_length: usize,
    pub generated_length: usize,
}

impl From<GenerationResult> for GenerateResponse {
    fn from(result: GenerationResult) -> Self {
        Self {
            text: result.text,
            prompt_length: result.prompt_length,
            generated_length: result.generated_length,
        }
    }
}
