//! Test doubles for the model collaborators

use crate::backend::{
    ArtifactResolver, Backend, LoadedModel, ModelArtifacts, ModelLoader, SamplingParams,
    TextTokenizer,
};
use crate::lifecycle::LifecycleManager;
use crate::task::CancellationToken;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use llmserve_common::{LlmServeError, MetricsRegistry};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One token per byte
pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, tokens: &[u32]) -> anyhow::Result<String> {
        let bytes = tokens
            .iter()
            .map(|&t| u8::try_from(t).map_err(|_| anyhow::anyhow!("token {} is not a byte", t)))
            .collect::<anyhow::Result<Vec<u8>>>()?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Shared instrumentation for [`ScriptedBackend`]
#[derive(Default)]
pub struct BackendProbe {
    pub calls: AtomicUsize,
    pub inside: AtomicUsize,
    pub overlapped: AtomicBool,
    pub last_params: Mutex<Option<SamplingParams>>,
}

enum Script {
    /// Echo the prompt, then append the continuation
    Echo(String),
    /// Return the continuation only
    Plain(String),
    /// Fail the first call, then echo the continuation
    FailOnce(String),
}

/// Backend returning canned output and recording how it is called
pub struct ScriptedBackend {
    script: Script,
    delay: Duration,
    probe: Arc<BackendProbe>,
}

impl ScriptedBackend {
    pub fn echo(continuation: &str) -> Self {
        Self::with_script(Script::Echo(continuation.to_string()))
    }

    pub fn plain(output: &str) -> Self {
        Self::with_script(Script::Plain(output.to_string()))
    }

    pub fn fail_once(continuation: &str) -> Self {
        Self::with_script(Script::FailOnce(continuation.to_string()))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: Duration::ZERO,
            probe: Arc::new(BackendProbe::default()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn probe(&self) -> Arc<BackendProbe> {
        Arc::clone(&self.probe)
    }
}

impl Backend for ScriptedBackend {
    fn generate(&mut self, prompt: &[u32], params: &SamplingParams) -> anyhow::Result<Vec<u32>> {
        let call = self.probe.calls.fetch_add(1, Ordering::SeqCst);
        if self.probe.inside.fetch_add(1, Ordering::SeqCst) != 0 {
            self.probe.overlapped.store(true, Ordering::SeqCst);
        }
        *self.probe.last_params.lock() = Some(*params);

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let result = match &self.script {
            Script::Echo(continuation) => {
                let mut output = prompt.to_vec();
                output.extend(format!(" {}", continuation).bytes().map(u32::from));
                Ok(output)
            }
            Script::Plain(output) => Ok(output.bytes().map(u32::from).collect()),
            Script::FailOnce(continuation) => {
                if call == 0 {
                    Err(anyhow::anyhow!("CUDA out of memory"))
                } else {
                    let mut output = prompt.to_vec();
                    output.extend(format!(" {}", continuation).bytes().map(u32::from));
                    Ok(output)
                }
            }
        };

        self.probe.inside.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }

    fn dtype(&self) -> String {
        "F32".to_string()
    }
}

/// Loader handing out a prepared backend and counting invocations
pub struct CountingLoader {
    calls: AtomicUsize,
    backend: Mutex<Option<ScriptedBackend>>,
    failure: Option<String>,
    gate: Option<Receiver<()>>,
    honours_cancel: bool,
}

impl CountingLoader {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            backend: Mutex::new(Some(backend)),
            failure: None,
            gate: None,
            honours_cancel: true,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            backend: Mutex::new(None),
            failure: Some(message.to_string()),
            gate: None,
            honours_cancel: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A loader that blocks until released or cancelled
pub fn gated_loader(backend: ScriptedBackend) -> (Arc<CountingLoader>, Sender<()>) {
    let (tx, rx) = channel::unbounded();
    let mut loader = CountingLoader::new(backend);
    loader.gate = Some(rx);
    (Arc::new(loader), tx)
}

/// Like [`gated_loader`], but keeps waiting after the deadline trips the token
pub fn uncancellable_loader(backend: ScriptedBackend) -> (Arc<CountingLoader>, Sender<()>) {
    let (tx, rx) = channel::unbounded();
    let mut loader = CountingLoader::new(backend);
    loader.gate = Some(rx);
    loader.honours_cancel = false;
    (Arc::new(loader), tx)
}

/// Loader whose worker panics
pub struct PanickingLoader;

impl ModelLoader for PanickingLoader {
    fn load(
        &self,
        _artifacts: &ModelArtifacts,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<LoadedModel> {
        panic!("weights mapping blew up");
    }
}

impl ModelLoader for CountingLoader {
    fn load(
        &self,
        _artifacts: &ModelArtifacts,
        cancel: &CancellationToken,
    ) -> anyhow::Result<LoadedModel> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            loop {
                if self.honours_cancel && cancel.is_cancelled() {
                    anyhow::bail!("cancelled");
                }
                match gate.recv_timeout(Duration::from_millis(5)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => continue,
                }
            }
        }

        if let Some(message) = &self.failure {
            anyhow::bail!("{}", message);
        }

        let backend = self
            .backend
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("backend already handed out"))?;
        Ok(LoadedModel::new(Box::new(ByteTokenizer), Box::new(backend)))
    }
}

/// Resolver that always succeeds
#[derive(Default)]
pub struct FixedResolver;

impl ArtifactResolver for FixedResolver {
    fn resolve(&self, _model_name: &str) -> llmserve_common::Result<ModelArtifacts> {
        Ok(ModelArtifacts {
            weights: PathBuf::from("model.gguf"),
            tokenizer: PathBuf::from("tokenizer.json"),
        })
    }
}

/// Resolver that never finds anything
pub struct BrokenResolver;

impl ArtifactResolver for BrokenResolver {
    fn resolve(&self, model_name: &str) -> llmserve_common::Result<ModelArtifacts> {
        Err(LlmServeError::config(format!("{} not found", model_name)))
    }
}

/// A lifecycle manager already in `Ready` with the given backend
pub fn ready_manager(backend: ScriptedBackend) -> Arc<LifecycleManager> {
    let manager = unloaded_manager(backend);
    manager
        .load_model(Duration::from_secs(5))
        .expect("scripted load succeeds");
    manager
}

/// A lifecycle manager still in `Unloaded`
pub fn unloaded_manager(backend: ScriptedBackend) -> Arc<LifecycleManager> {
    Arc::new(LifecycleManager::new(
        "test-model",
        "CausalLM",
        Arc::new(FixedResolver),
        Arc::new(CountingLoader::new(backend)),
        Arc::new(MetricsRegistry::new().expect("metrics registry")),
    ))
}
