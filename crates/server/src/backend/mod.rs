//! Model collaborators
//!
//! The lifecycle manager and the inference service only see these traits:
//! a tokenizer, a generation backend, a loader that builds both from resolved
//! artifacts, and a resolver that locates those artifacts. The production
//! implementation lives in [`candle`].

pub mod candle;

use crate::task::CancellationToken;
use std::path::PathBuf;

pub use candle::{CandleBackend, CandleLoader, HfTokenizer};

/// Sampling parameters for a single generation call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Maximum number of new tokens
    pub max_tokens: usize,

    /// Sampling temperature (0 = greedy)
    pub temperature: f64,

    /// Nucleus sampling threshold
    pub top_p: f64,
}

/// Text <-> token conversion
pub trait TextTokenizer: Send {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32]) -> anyhow::Result<String>;
}

/// Generation engine
///
/// Implementations are not required to support concurrent calls; callers
/// serialize access through the model handle.
pub trait Backend: Send {
    /// Generate from a prompt token sequence.
    ///
    /// The returned sequence may or may not start with an echo of the prompt.
    fn generate(&mut self, prompt: &[u32], params: &SamplingParams) -> anyhow::Result<Vec<u32>>;

    /// Device the weights live on
    fn device(&self) -> String;

    /// Weight data type
    fn dtype(&self) -> String;
}

/// Loaded weights plus tokenizer
pub struct LoadedModel {
    pub tokenizer: Box<dyn TextTokenizer>,
    pub backend: Box<dyn Backend>,
}

impl LoadedModel {
    pub fn new(tokenizer: Box<dyn TextTokenizer>, backend: Box<dyn Backend>) -> Self {
        Self { tokenizer, backend }
    }

    /// Encode, generate and decode in one step
    pub fn complete(
        &mut self,
        formatted_prompt: &str,
        params: &SamplingParams,
    ) -> anyhow::Result<String> {
        let prompt_tokens = self.tokenizer.encode(formatted_prompt)?;
        let output_tokens = self.backend.generate(&prompt_tokens, params)?;
        self.tokenizer.decode(&output_tokens)
    }
}

/// Filesystem locations of the model artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
}

/// Builds a [`LoadedModel`] from resolved artifacts
///
/// Runs on the loader worker thread. Long loads should check `cancel`
/// between stages and give up once it is tripped.
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        artifacts: &ModelArtifacts,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LoadedModel>;
}

/// Locates model artifacts for a logical model name
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, model_name: &str) -> llmserve_common::Result<ModelArtifacts>;
}
