//! Common error types for llmserve
//!
//! This module defines the error taxonomy shared by the model lifecycle,
//! the inference path and the HTTP surface. Every error knows its stable
//! kind tag and the HTTP status it maps to, so callers can tell retryable
//! conditions (503, 500) from non-retryable ones (400).

use std::net::AddrParseError;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Main error type for llmserve
#[derive(Error, Debug)]
pub enum LlmServeError {
    /// Model artifacts could not be resolved, or the configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model load exceeded its deadline
    #[error("Model load timed out after {0:?}")]
    LoadTimeout(Duration),

    /// Backend or tokenizer error while loading
    #[error("Model load failed: {0}")]
    LoadFailure(String),

    /// A load is already in flight
    #[error("Model load already in progress")]
    AlreadyLoading,

    /// Handle requested while the model is not ready
    #[error("Model not ready: {0}")]
    NotReady(String),

    /// Malformed request fields
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Request received while the model is not ready
    #[error("Service unavailable: model is {0}")]
    ServiceUnavailable(String),

    /// Backend error during inference
    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Metrics registration or encoding errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AddrParseError> for LlmServeError {
    fn from(err: AddrParseError) -> Self {
        LlmServeError::Configuration(format!("Invalid bind address: {}", err))
    }
}

impl LlmServeError {
    /// Stable snake_case tag identifying the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            LlmServeError::Configuration(_) => "configuration_error",
            LlmServeError::LoadTimeout(_) => "load_timeout",
            LlmServeError::LoadFailure(_) => "load_failure",
            LlmServeError::AlreadyLoading => "already_loading",
            LlmServeError::NotReady(_) => "not_ready",
            LlmServeError::Validation(_) => "validation_error",
            LlmServeError::ServiceUnavailable(_) => "service_unavailable",
            LlmServeError::GenerationFailure(_) => "generation_failure",
            LlmServeError::Serialization(_) => "serialization_error",
            LlmServeError::Yaml(_) => "configuration_error",
            LlmServeError::Metrics(_) => "internal_error",
            LlmServeError::Io(_) => "io_error",
            LlmServeError::Internal(_) => "internal_error",
        }
    }

    /// Convert error to an HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            LlmServeError::Validation(_) | LlmServeError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            LlmServeError::ServiceUnavailable(_)
            | LlmServeError::NotReady(_)
            | LlmServeError::AlreadyLoading => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        self.status_code() != StatusCode::BAD_REQUEST
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        LlmServeError::Configuration(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        LlmServeError::Validation(msg.into())
    }

    /// Create a generation failure
    pub fn generation(msg: impl Into<String>) -> Self {
        LlmServeError::GenerationFailure(msg.into())
    }

    /// Create a load failure
    pub fn load_failure(msg: impl Into<String>) -> Self {
        LlmServeError::LoadFailure(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        LlmServeError::Internal(msg.into())
    }
}

/// JSON body carried by every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

impl IntoResponse for LlmServeError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Result type alias for llmserve operations
pub type Result<T> = std::result::Result<T, LlmServeError>;
