//! Quantized GGUF backend built on candle
//!
//! Loads Llama-family (Mistral included) GGUF weights through
//! `candle-transformers` and a HuggingFace `tokenizer.json` through
//! `tokenizers`. The backend returns only newly generated tokens.

use super::{Backend, LoadedModel, ModelArtifacts, ModelLoader, SamplingParams, TextTokenizer};
use crate::task::CancellationToken;
use anyhow::{anyhow, bail, Context};
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama::ModelWeights;
use llmserve_common::config::ModelConfig;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where to place the weights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl DeviceSpec {
    /// Parse "cpu", "cuda", "cuda:N", "metal" or "metal:N"
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let spec = spec.trim().to_ascii_lowercase();
        let (kind, ordinal) = match spec.split_once(':') {
            Some((kind, ordinal)) => {
                let ordinal = ordinal
                    .parse::<usize>()
                    .with_context(|| format!("invalid device ordinal in {:?}", spec))?;
                (kind.to_string(), ordinal)
            }
            None => (spec.clone(), 0),
        };

        match kind.as_str() {
            "cpu" => Ok(DeviceSpec::Cpu),
            "cuda" => Ok(DeviceSpec::Cuda(ordinal)),
            "metal" => Ok(DeviceSpec::Metal(ordinal)),
            other => bail!("unknown device {:?}, expected cpu, cuda[:N] or metal[:N]", other),
        }
    }

    fn open(self) -> anyhow::Result<Device> {
        match self {
            DeviceSpec::Cpu => Ok(Device::Cpu),
            DeviceSpec::Cuda(ordinal) => {
                Device::new_cuda(ordinal).context("failed to open CUDA device")
            }
            DeviceSpec::Metal(ordinal) => {
                Device::new_metal(ordinal).context("failed to open Metal device")
            }
        }
    }
}

/// `tokenizers` adapter
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("failed to load tokenizer from {}", path.display()))?;
        Ok(Self { inner })
    }

    pub fn token_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        // The prompt template spells out its own special tokens
        let encoding = self.inner.encode(text, false).map_err(anyhow::Error::msg)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, tokens: &[u32]) -> anyhow::Result<String> {
        self.inner.decode(tokens, true).map_err(anyhow::Error::msg)
    }
}

/// Quantized Llama/Mistral weights plus sampling state
pub struct CandleBackend {
    weights: ModelWeights,
    device: Device,
    dtype: String,
    eos_token: Option<u32>,
    seed: u64,
}

impl CandleBackend {
    fn device_label(&self) -> &'static str {
        if self.device.is_cuda() {
            "cuda"
        } else if self.device.is_metal() {
            "metal"
        } else {
            "cpu"
        }
    }

    fn next_token(
        &mut self,
        processor: &mut LogitsProcessor,
        tokens: &[u32],
        index_pos: usize,
    ) -> anyhow::Result<u32> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = self.weights.forward(&input, index_pos)?.squeeze(0)?;
        Ok(processor.sample(&logits)?)
    }
}

impl Backend for CandleBackend {
    fn generate(&mut self, prompt: &[u32], params: &SamplingParams) -> anyhow::Result<Vec<u32>> {
        if prompt.is_empty() {
            bail!("prompt encoded to zero tokens");
        }

        let start = Instant::now();
        let mut processor =
            LogitsProcessor::new(self.seed, Some(params.temperature), Some(params.top_p));
        let mut generated = Vec::with_capacity(params.max_tokens.min(4096));

        // index_pos 0 resets the KV cache left over from the previous request
        let mut next = self.next_token(&mut processor, prompt, 0)?;
        while generated.len() < params.max_tokens {
            if Some(next) == self.eos_token {
                break;
            }
            generated.push(next);
            if generated.len() == params.max_tokens {
                break;
            }
            let index_pos = prompt.len() + generated.len() - 1;
            next = self.next_token(&mut processor, &[next], index_pos)?;
        }

        let elapsed = start.elapsed();
        debug!(
            "Generated {} tokens in {:?} ({:.2} tokens/s)",
            generated.len(),
            elapsed,
            generated.len() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
        );

        Ok(generated)
    }

    fn device(&self) -> String {
        self.device_label().to_string()
    }

    fn dtype(&self) -> String {
        self.dtype.clone()
    }
}

/// Loads GGUF weights and a tokenizer into a [`CandleBackend`]
#[derive(Debug, Clone)]
pub struct CandleLoader {
    device: DeviceSpec,
    eos_token: String,
    seed: u64,
}

impl CandleLoader {
    pub fn new(device: DeviceSpec, eos_token: impl Into<String>, seed: u64) -> Self {
        Self {
            device,
            eos_token: eos_token.into(),
            seed,
        }
    }

    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            DeviceSpec::parse(&config.device)?,
            config.eos_token.clone(),
            config.seed,
        ))
    }
}

fn check_cancelled(cancel: &CancellationToken) -> anyhow::Result<()> {
    if cancel.is_cancelled() {
        return Err(anyhow!("load cancelled after deadline"));
    }
    Ok(())
}

impl ModelLoader for CandleLoader {
    fn load(
        &self,
        artifacts: &ModelArtifacts,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LoadedModel> {
        let device = self.device.open()?;

        info!("Loading tokenizer from {}", artifacts.tokenizer.display());
        let tokenizer = HfTokenizer::from_file(&artifacts.tokenizer)?;
        let eos_token = tokenizer.token_id(&self.eos_token);
        if eos_token.is_none() {
            warn!(
                "EOS token {:?} not in vocabulary, generation stops only at max_tokens",
                self.eos_token
            );
        }
        check_cancelled(cancel)?;

        info!("Loading weights from {}", artifacts.weights.display());
        let mut file = File::open(&artifacts.weights)
            .with_context(|| format!("failed to open {}", artifacts.weights.display()))?;
        let content = gguf_file::Content::read(&mut file).with_context(|| {
            format!("failed to read GGUF header of {}", artifacts.weights.display())
        })?;

        // Report the dtype of the output projection, else of any tensor
        let dtype = content
            .tensor_infos
            .get("output.weight")
            .or_else(|| content.tensor_infos.values().next())
            .map(|info| format!("{:?}", info.ggml_dtype))
            .unwrap_or_else(|| "unknown".to_string());
        debug!("Model dtype: {}, {} tensors", dtype, content.tensor_infos.len());
        check_cancelled(cancel)?;

        let weights = ModelWeights::from_gguf(content, &mut file, &device).with_context(|| {
            format!("failed to build model from {}", artifacts.weights.display())
        })?;

        let size_bytes = std::fs::metadata(&artifacts.weights)
            .map(|m| m.len())
            .unwrap_or(0);
        info!(
            "Model weights loaded: {:.2} GB",
            size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
        );

        let backend = CandleBackend {
            weights,
            device,
            dtype,
            eos_token,
            seed: self.seed,
        };

        Ok(LoadedModel::new(Box::new(tokenizer), Box::new(backend)))
    }
}
