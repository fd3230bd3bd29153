//! Metrics collection for llmserve
//!
//! This module provides Prometheus metrics for observability. The registry is an
//! explicit context object handed to the lifecycle manager and the inference
//! service rather than a process-wide global.

use crate::error::Result;
use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

/// Metrics registry for llmserve
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Registry,
    pub inference: InferenceMetrics,
    pub model: ModelMetrics,
}

/// Inference-related metrics
#[derive(Debug, Clone)]
pub struct InferenceMetrics {
    /// Total number of generation requests
    pub requests_total: IntCounter,

    /// Total number of successful requests
    pub requests_success: IntCounter,

    /// Failed requests, labelled by error kind
    pub requests_failed: IntCounterVec,

    /// Request duration histogram
    pub request_duration: Histogram,

    /// Characters generated total
    pub generated_chars_total: IntCounter,

    /// Current active requests
    pub active_requests: IntGauge,
}

/// Model lifecycle metrics
#[derive(Debug, Clone)]
pub struct ModelMetrics {
    /// Number of load attempts
    pub load_attempts: IntCounter,

    /// Duration of the last finished load attempt
    pub load_duration_seconds: Gauge,

    /// Lifecycle phase: 0 unloaded, 1 loading, 2 ready, 3 failed
    pub lifecycle_phase: IntGauge,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounter::new(
            "inference_requests_total",
            "Total number of generation requests",
        )?;

        let requests_success = IntCounter::new(
            "inference_requests_success_total",
            "Total number of successful generation requests",
        )?;

        let requests_failed = IntCounterVec::new(
            Opts::new(
                "inference_requests_failed_total",
                "Total number of failed generation requests",
            ),
            &["kind"],
        )?;

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "inference_request_duration_seconds",
                "Generation request duration in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        let generated_chars_total = IntCounter::new(
            "inference_generated_chars_total",
            "Total number of characters returned to callers",
        )?;

        let active_requests = IntGauge::new(
            "inference_active_requests",
            "Current number of generation requests in flight",
        )?;

        let load_attempts = IntCounter::new(
            "model_load_attempts_total",
            "Total number of model load attempts",
        )?;

        let load_duration_seconds = Gauge::new(
            "model_load_duration_seconds",
            "Duration of the last finished model load attempt",
        )?;

        let lifecycle_phase = IntGauge::new(
            "model_lifecycle_phase",
            "Model lifecycle phase (0 unloaded, 1 loading, 2 ready, 3 failed)",
        )?;

        // Register all metrics
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_success.clone()))?;
        registry.register(Box::new(requests_failed.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(generated_chars_total.clone()))?;
        registry.register(Box::new(active_requests.clone()))?;

        registry.register(Box::new(load_attempts.clone()))?;
        registry.register(Box::new(load_duration_seconds.clone()))?;
        registry.register(Box::new(lifecycle_phase.clone()))?;

        // CPU, memory and fd usage of the server process
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let inference = InferenceMetrics {
            requests_total,
            requests_success,
            requests_failed,
            request_duration,
            generated_chars_total,
            active_requests,
        };

        let model = ModelMetrics {
            load_attempts,
            load_duration_seconds,
            lifecycle_phase,
        };

        Ok(MetricsRegistry {
            registry,
            inference,
            model,
        })
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            crate::error::LlmServeError::internal(format!("metrics are not UTF-8: {}", e))
        })
    }
}
