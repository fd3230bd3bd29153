//! Model artifact discovery
//!
//! Tries an ordered list of candidate paths for the weights and the tokenizer;
//! the first existing file wins.

use crate::backend::{ArtifactResolver, ModelArtifacts};
use llmserve_common::config::ModelConfig;
use llmserve_common::{LlmServeError, Result};
use std::path::PathBuf;
use tracing::{debug, info};

/// Resolver over fixed candidate lists
#[derive(Debug, Clone)]
pub struct SearchPathResolver {
    weights_candidates: Vec<PathBuf>,
    tokenizer_candidates: Vec<PathBuf>,
}

impl SearchPathResolver {
    pub fn new(weights_candidates: Vec<PathBuf>, tokenizer_candidates: Vec<PathBuf>) -> Self {
        Self {
            weights_candidates,
            tokenizer_candidates,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.weights_candidates.clone(),
            config.tokenizer_candidates.clone(),
        )
    }

    fn first_existing(kind: &str, model_name: &str, candidates: &[PathBuf]) -> Result<PathBuf> {
        for candidate in candidates {
            if candidate.is_file() {
                debug!("Found {} for {} at {}", kind, model_name, candidate.display());
                return Ok(candidate.clone());
            }
            debug!("No {} at {}", kind, candidate.display());
        }

        let tried = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(LlmServeError::config(format!(
            "{} {} not found. Tried: {}",
            model_name, kind, tried
        )))
    }
}

impl ArtifactResolver for SearchPathResolver {
    fn resolve(&self, model_name: &str) -> Result<ModelArtifacts> {
        let weights = Self::first_existing("weights", model_name, &self.weights_candidates)?;
        let tokenizer = Self::first_existing("tokenizer", model_name, &self.tokenizer_candidates)?;

        info!(
            "Resolved {}: weights={}, tokenizer={}",
            model_name,
            weights.display(),
            tokenizer.display()
        );

        Ok(ModelArtifacts { weights, tokenizer })
    }
}
