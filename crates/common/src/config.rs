//! Configuration structures for llmserve
//!
//! This module defines every recognized configuration option and its default.
//! Configurations are loaded from YAML files and can be overridden by environment
//! variables. Unknown keys are rejected rather than silently ignored.

use crate::error::{LlmServeError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the YAML configuration file
pub const CONFIG_PATH_ENV: &str = "LLMSERVE_CONFIG";

/// Placeholder substituted with the user prompt in the prompt template
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Top-level configuration for the inference server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Model artifacts and loading
    #[serde(default)]
    pub model: ModelConfig,

    /// Defaults applied to omitted request fields
    #[serde(default)]
    pub generation: GenerationDefaults,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Logical model name reported by /health and /model_info
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Model type reported by /model_info
    #[serde(default = "default_model_type")]
    pub model_type: String,

    /// Ordered list of candidate GGUF weight files; the first existing one wins
    #[serde(default = "default_weights_candidates")]
    pub weights_candidates: Vec<PathBuf>,

    /// Ordered list of candidate tokenizer.json files
    #[serde(default = "default_tokenizer_candidates")]
    pub tokenizer_candidates: Vec<PathBuf>,

    /// Deadline for the initial model load in seconds
    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,

    /// Compute device: "cpu", "cuda:N" or "metal"
    #[serde(default = "default_device")]
    pub device: String,

    /// Prompt template, must contain `{prompt}`
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,

    /// End-of-sequence token that stops generation
    #[serde(default = "default_eos_token")]
    pub eos_token: String,

    /// Sampling seed
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Generation defaults
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GenerationDefaults {
    /// Maximum number of new tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature (0 = greedy)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Nucleus sampling threshold in (0, 1]
    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Expose Prometheus metrics at /metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            model_type: default_model_type(),
            weights_candidates: default_weights_candidates(),
            tokenizer_candidates: default_tokenizer_candidates(),
            load_timeout_secs: default_load_timeout(),
            device: default_device(),
            prompt_template: default_prompt_template(),
            eos_token: default_eos_token(),
            seed: default_seed(),
        }
    }
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
        }
    }
}

/// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_model_name() -> String {
    "Mistral-7B-Instruct-v0.1".to_string()
}

fn default_model_type() -> String {
    "CausalLM".to_string()
}

fn default_weights_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("assets/ai_models/mistral/mistral-7b-instruct-v0.1-q4_k_m.gguf"),
        PathBuf::from("mistral-7b-instruct-v0.1-q4_k_m.gguf"),
        PathBuf::from("../assets/ai_models/mistral/mistral-7b-instruct-v0.1-q4_k_m.gguf"),
        PathBuf::from("./mistral-7b-instruct-v0.1-q4_k_m.gguf"),
    ]
}

fn default_tokenizer_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("assets/ai_models/mistral/tokenizer.json"),
        PathBuf::from("tokenizer.json"),
        PathBuf::from("../assets/ai_models/mistral/tokenizer.json"),
    ]
}

fn default_load_timeout() -> u64 {
    600
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_prompt_template() -> String {
    "<s>[INST] {prompt} [/INST]".to_string()
}

fn default_eos_token() -> String {
    "</s>".to_string()
}

fn default_seed() -> u64 {
    299_792_458
}

fn default_max_tokens() -> usize {
    2048
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl ServiceConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LlmServeError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_yaml(&content).map_err(|e| match e {
            LlmServeError::Yaml(err) => LlmServeError::config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                err
            )),
            other => other,
        })
    }

    /// Parse and validate configuration from a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `LLMSERVE_CONFIG` (or defaults), then apply
    /// environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("LLMSERVE_BIND_ADDRESS") {
            self.server.bind_address = address;
        }

        if let Some(port) = lookup("LLMSERVE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| LlmServeError::config(format!("Invalid port number: {}", port)))?;
        }

        if let Some(path) = lookup("LLMSERVE_MODEL_PATH") {
            self.model.weights_candidates.insert(0, PathBuf::from(path));
        }

        if let Some(path) = lookup("LLMSERVE_TOKENIZER_PATH") {
            self.model.tokenizer_candidates.insert(0, PathBuf::from(path));
        }

        if let Some(secs) = lookup("LLMSERVE_LOAD_TIMEOUT_SECS") {
            self.model.load_timeout_secs = secs.parse().map_err(|_| {
                LlmServeError::config(format!("Invalid load timeout: {}", secs))
            })?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(LlmServeError::config("Model name must not be empty"));
        }

        if self.model.weights_candidates.is_empty() {
            return Err(LlmServeError::config("At least one weights candidate is required"));
        }

        if self.model.tokenizer_candidates.is_empty() {
            return Err(LlmServeError::config("At least one tokenizer candidate is required"));
        }

        if self.model.load_timeout_secs == 0 {
            return Err(LlmServeError::config("load_timeout_secs must be positive"));
        }

        if !self.model.prompt_template.contains(PROMPT_PLACEHOLDER) {
            return Err(LlmServeError::config(format!(
                "prompt_template must contain {}",
                PROMPT_PLACEHOLDER
            )));
        }

        self.generation.validate()?;
        self.socket_addr()?;
        Ok(())
    }

    /// Get the HTTP bind address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.server.bind_address, self.server.port).parse()?)
    }

    /// Get the model load deadline as Duration
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.model.load_timeout_secs)
    }
}

impl GenerationDefaults {
    /// Validate the defaults with the same rules applied to requests
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(LlmServeError::config("generation.max_tokens must be positive"));
        }

        if self.temperature.is_nan() || self.temperature < 0.0 {
            return Err(LlmServeError::config("generation.temperature must be >= 0"));
        }

        if self.top_p.is_nan() || self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(LlmServeError::config("generation.top_p must be in (0, 1]"));
        }

        Ok(())
    }
}
