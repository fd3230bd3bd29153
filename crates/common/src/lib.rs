//! llmserve common library
//!
//! This crate contains configuration, the error taxonomy and metrics shared
//! by the inference server.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{GenerationDefaults, ServiceConfig};
pub use error::{LlmServeError, Result};
pub use metrics::MetricsRegistry;
