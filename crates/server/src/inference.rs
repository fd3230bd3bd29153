//! Inference request path
//!
//! Validates a request, applies defaults, takes the model's exclusive-access
//! gate for the duration of the backend call and shapes the result.

use crate::backend::SamplingParams;
use crate::lifecycle::{LifecycleManager, LifecycleState};
use llmserve_common::config::PROMPT_PLACEHOLDER;
use llmserve_common::{GenerationDefaults, LlmServeError, MetricsRegistry, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Generation request as received; omitted fields take the configured defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationRequest {
    pub prompt: Option<String>,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

/// A validated request with every field populated
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRequest {
    pub prompt: String,
    pub params: SamplingParams,
}

/// Generation output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub prompt_length: usize,
    pub generated_length: usize,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    /// Apply defaults, then validate every field
    pub fn normalize(&self, defaults: &GenerationDefaults) -> Result<NormalizedRequest> {
        let prompt = match self.prompt.as_deref() {
            Some(prompt) if !prompt.is_empty() => prompt.to_string(),
            _ => return Err(LlmServeError::validation("No prompt provided")),
        };

        let max_tokens = match self.max_tokens {
            None => defaults.max_tokens,
            Some(n) if n > 0 => usize::try_from(n)
                .map_err(|_| LlmServeError::validation("max_tokens is too large"))?,
            Some(n) => {
                return Err(LlmServeError::validation(format!(
                    "max_tokens must be positive, got {}",
                    n
                )))
            }
        };

        let temperature = self.temperature.unwrap_or(defaults.temperature);
        if temperature.is_nan() || temperature < 0.0 {
            return Err(LlmServeError::validation(format!(
                "temperature must be >= 0, got {}",
                temperature
            )));
        }

        let top_p = self.top_p.unwrap_or(defaults.top_p);
        if top_p.is_nan() || top_p <= 0.0 || top_p > 1.0 {
            return Err(LlmServeError::validation(format!(
                "top_p must be in (0, 1], got {}",
                top_p
            )));
        }

        Ok(NormalizedRequest {
            prompt,
            params: SamplingParams {
                max_tokens,
                temperature,
                top_p,
            },
        })
    }
}

/// Remove an echoed prompt from raw backend output.
///
/// If `formatted_prompt` occurs in `raw`, everything up to and including its
/// first occurrence is dropped and the remainder is trimmed. Otherwise `raw`
/// is returned unchanged.
pub fn strip_prompt_echo(raw: &str, formatted_prompt: &str) -> String {
    match raw.find(formatted_prompt) {
        Some(pos) => raw[pos + formatted_prompt.len()..].trim().to_string(),
        None => raw.to_string(),
    }
}

/// Serves generation requests against the lifecycle manager's model
pub struct InferenceService {
    lifecycle: Arc<LifecycleManager>,
    defaults: GenerationDefaults,
    prompt_template: String,
    metrics: Arc<MetricsRegistry>,
}

impl InferenceService {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        defaults: GenerationDefaults,
        prompt_template: impl Into<String>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            lifecycle,
            defaults,
            prompt_template: prompt_template.into(),
            metrics,
        }
    }

    /// Render the prompt template for a user prompt
    pub fn format_prompt(&self, prompt: &str) -> String {
        self.prompt_template.replace(PROMPT_PLACEHOLDER, prompt)
    }

    /// Generate text for a request. Blocks for the whole backend call.
    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let metrics = &self.metrics.inference;
        metrics.requests_total.inc();
        metrics.active_requests.inc();
        let timer = metrics.request_duration.start_timer();

        let result = self.generate_inner(request);

        timer.observe_duration();
        metrics.active_requests.dec();
        match &result {
            Ok(output) => {
                metrics.requests_success.inc();
                metrics.generated_chars_total.inc_by(output.generated_length as u64);
            }
            Err(e) => {
                metrics.requests_failed.with_label_values(&[e.kind()]).inc();
            }
        }

        result
    }

    fn generate_inner(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let normalized = request.normalize(&self.defaults)?;

        let handle = match self.lifecycle.state() {
            LifecycleState::Ready(handle) => handle,
            other => {
                return Err(LlmServeError::ServiceUnavailable(other.phase().to_string()));
            }
        };

        let prompt_length = normalized.prompt.chars().count();
        info!("Generating text with prompt length: {}", prompt_length);

        let formatted = self.format_prompt(&normalized.prompt);
        debug!("Waiting for model gate, params: {:?}", normalized.params);
        // The guard is a temporary, so the gate is released at the end of this
        // statement on every path
        let raw = handle
            .lock()
            .complete(&formatted, &normalized.params)
            .map_err(|e| {
                warn!("Text generation failed: {:#}", e);
                LlmServeError::generation(format!("{:#}", e))
            })?;

        let text = strip_prompt_echo(&raw, &formatted);
        let generated_length = text.chars().count();
        info!("Generated text length: {}", generated_length);

        Ok(GenerationResult {
            text,
            prompt_length,
            generated_length,
        })
    }
}
