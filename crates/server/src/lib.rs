//! llmserve server
//!
//! Loads a single causal language model under a time budget and serves text
//! generation over HTTP. Generation is serialized through one exclusive-access
//! gate on the loaded model; health reads never wait on it.

pub mod backend;
pub mod health;
pub mod http;
pub mod inference;
pub mod lifecycle;
pub mod resolver;
pub mod task;

#[cfg(test)]
mod testing;

pub use backend::{
    ArtifactResolver, Backend, LoadedModel, ModelArtifacts, ModelLoader, SamplingParams,
    TextTokenizer,
};
pub use health::{HealthReporter, HealthSnapshot};
pub use inference::{GenerationRequest, GenerationResult, InferenceService};
pub use lifecycle::{
    LifecycleManager, LifecyclePhase, LifecycleState, LoadFailure, ModelHandle, ModelInfo,
};
pub use resolver::SearchPathResolver;
