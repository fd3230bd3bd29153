//! Model lifecycle management
//!
//! Owns the single model handle and the `Unloaded -> Loading -> Ready | Failed`
//! state machine. Loading runs on a bounded-time worker; state reads never wait
//! on a load or on an in-flight generation.

use crate::backend::{ArtifactResolver, LoadedModel, ModelLoader};
use crate::task::{self, TaskOutcome};
use llmserve_common::{LlmServeError, MetricsRegistry, Result};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Why a load ended in `Failed`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadFailure {
    /// Artifacts could not be resolved
    #[error("{0}")]
    Configuration(String),

    /// The loader did not finish before the deadline
    #[error("load did not finish within {0:?}")]
    Timeout(Duration),

    /// The loader reported an error or crashed
    #[error("{0}")]
    Backend(String),
}

impl From<LoadFailure> for LlmServeError {
    fn from(failure: LoadFailure) -> Self {
        match failure {
            LoadFailure::Configuration(msg) => LlmServeError::Configuration(msg),
            LoadFailure::Timeout(deadline) => LlmServeError::LoadTimeout(deadline),
            LoadFailure::Backend(msg) => LlmServeError::load_failure(msg),
        }
    }
}

/// Lifecycle phase without the payload, cheap to copy and report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Unloaded => "unloaded",
            LifecyclePhase::Loading => "loading",
            LifecyclePhase::Ready => "ready",
            LifecyclePhase::Failed => "failed",
        }
    }

    fn gauge_value(&self) -> i64 {
        match self {
            LifecyclePhase::Unloaded => 0,
            LifecyclePhase::Loading => 1,
            LifecyclePhase::Ready => 2,
            LifecyclePhase::Failed => 3,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model readiness
#[derive(Clone)]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Ready(Arc<ModelHandle>),
    Failed(LoadFailure),
}

impl LifecycleState {
    pub fn phase(&self) -> LifecyclePhase {
        match self {
            LifecycleState::Unloaded => LifecyclePhase::Unloaded,
            LifecycleState::Loading => LifecyclePhase::Loading,
            LifecycleState::Ready(_) => LifecyclePhase::Ready,
            LifecycleState::Failed(_) => LifecyclePhase::Failed,
        }
    }
}

impl fmt::Debug for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Failed(reason) => write!(f, "Failed({:?})", reason),
            other => f.write_str(other.phase().as_str()),
        }
    }
}

/// Static facts about the loaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub model_type: String,
    pub device: String,
    pub dtype: String,
}

/// The single loaded model
///
/// The model sits behind an exclusive-access gate: the backend is not assumed
/// to be safe for concurrent calls.
pub struct ModelHandle {
    info: ModelInfo,
    gate: Mutex<LoadedModel>,
}

impl ModelHandle {
    pub fn new(model_name: &str, model_type: &str, model: LoadedModel) -> Self {
        let info = ModelInfo {
            model_name: model_name.to_string(),
            model_type: model_type.to_string(),
            device: model.backend.device(),
            dtype: model.backend.dtype(),
        };

        Self {
            info,
            gate: Mutex::new(model),
        }
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Block until exclusive access to the model is granted
    pub fn lock(&self) -> MutexGuard<'_, LoadedModel> {
        self.gate.lock()
    }
}

/// Clears the in-flight flag once `load_model` and its loader worker have
/// both let go of it
struct LoadSlot(Arc<AtomicBool>);

impl Drop for LoadSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the model handle and its state machine
pub struct LifecycleManager {
    model_name: String,
    model_type: String,
    resolver: Arc<dyn ArtifactResolver>,
    loader: Arc<dyn ModelLoader>,
    state: RwLock<LifecycleState>,
    load_in_flight: Arc<AtomicBool>,
    metrics: Arc<MetricsRegistry>,
}

impl LifecycleManager {
    pub fn new(
        model_name: impl Into<String>,
        model_type: impl Into<String>,
        resolver: Arc<dyn ArtifactResolver>,
        loader: Arc<dyn ModelLoader>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        metrics.model.lifecycle_phase.set(LifecyclePhase::Unloaded.gauge_value());

        Self {
            model_name: model_name.into(),
            model_type: model_type.into(),
            resolver,
            loader,
            state: RwLock::new(LifecycleState::Unloaded),
            load_in_flight: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Current state; never waits on a load or a generation
    pub fn state(&self) -> LifecycleState {
        self.state.read().clone()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.state.read().phase()
    }

    /// The loaded model, or `NotReady` unless the state is `Ready`
    pub fn handle(&self) -> Result<Arc<ModelHandle>> {
        match &*self.state.read() {
            LifecycleState::Ready(handle) => Ok(Arc::clone(handle)),
            other => Err(LlmServeError::NotReady(other.phase().to_string())),
        }
    }

    fn transition(&self, next: LifecycleState) {
        let phase = next.phase();
        let previous = std::mem::replace(&mut *self.state.write(), next);
        self.metrics.model.lifecycle_phase.set(phase.gauge_value());
        info!("Model {} lifecycle: {} -> {}", self.model_name, previous.phase(), phase);
    }

    /// Load the model, blocking the caller for at most `deadline`.
    ///
    /// Fails fast with `AlreadyLoading` while another load is in flight. Every
    /// failure is also recorded as `Failed`; there is no automatic retry.
    ///
    /// A worker abandoned after a timeout keeps the load slot until it exits,
    /// so an explicit reload from `Failed` returns `AlreadyLoading` rather than
    /// running a second loader next to it.
    pub fn load_model(&self, deadline: Duration) -> Result<()> {
        if self
            .load_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Rejecting load of {}: a load is already in progress", self.model_name);
            return Err(LlmServeError::AlreadyLoading);
        }
        let slot = Arc::new(LoadSlot(Arc::clone(&self.load_in_flight)));

        if self.phase() == LifecyclePhase::Ready {
            warn!("Model {} is already loaded, ignoring load request", self.model_name);
            return Ok(());
        }

        self.metrics.model.load_attempts.inc();

        let artifacts = match self.resolver.resolve(&self.model_name) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                error!("Failed to resolve artifacts for {}: {}", self.model_name, e);
                return Err(self.fail(LoadFailure::Configuration(e.to_string())));
            }
        };

        self.transition(LifecycleState::Loading);
        info!("Loading {} with a {:?} deadline", self.model_name, deadline);

        let start = Instant::now();
        let loader = Arc::clone(&self.loader);
        let worker_slot = Arc::clone(&slot);
        let outcome = task::run_with_deadline("model-loader", deadline, move |cancel| {
            let _slot = worker_slot;
            loader.load(&artifacts, &cancel)
        });
        self.metrics
            .model
            .load_duration_seconds
            .set(start.elapsed().as_secs_f64());

        match outcome {
            Ok(TaskOutcome::Completed(model)) => {
                let handle = ModelHandle::new(&self.model_name, &self.model_type, model);
                info!(
                    "Model {} ready on {} ({}) in {:?}",
                    self.model_name,
                    handle.info().device,
                    handle.info().dtype,
                    start.elapsed()
                );
                self.transition(LifecycleState::Ready(Arc::new(handle)));
                Ok(())
            }
            Ok(TaskOutcome::Failed(e)) => {
                error!("Failed to load {}: {:#}", self.model_name, e);
                Err(self.fail(LoadFailure::Backend(format!("{:#}", e))))
            }
            Ok(TaskOutcome::TimedOut) => {
                error!("Loading {} exceeded {:?}", self.model_name, deadline);
                Err(self.fail(LoadFailure::Timeout(deadline)))
            }
            Ok(TaskOutcome::Panicked) => {
                error!("Loader for {} panicked", self.model_name);
                Err(self.fail(LoadFailure::Backend("loader panicked".to_string())))
            }
            Err(e) => {
                error!("Could not start loader for {}: {}", self.model_name, e);
                Err(self.fail(LoadFailure::Backend(e.to_string())))
            }
        }
    }

    fn fail(&self, failure: LoadFailure) -> LlmServeError {
        self.transition(LifecycleState::Failed(failure.clone()));
        failure.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        gated_loader, uncancellable_loader, BrokenResolver, CountingLoader, FixedResolver,
        PanickingLoader, ScriptedBackend,
    };
    use std::thread;

    fn manager(loader: Arc<CountingLoader>) -> LifecycleManager {
        LifecycleManager::new(
            "test-model",
            "CausalLM",
            Arc::new(FixedResolver::default()),
            loader,
            Arc::new(MetricsRegistry::new().unwrap()),
        )
    }

    fn wait_for_phase(manager: &LifecycleManager, phase: LifecyclePhase) {
        let start = Instant::now();
        while manager.phase() != phase {
            assert!(start.elapsed() < Duration::from_secs(5), "never reached {}", phase);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_starts_unloaded() {
        let manager = manager(Arc::new(CountingLoader::new(ScriptedBackend::echo("ok"))));

        assert_eq!(manager.phase(), LifecyclePhase::Unloaded);
        assert!(matches!(manager.handle(), Err(LlmServeError::NotReady(_))));
    }

    #[test]
    fn test_successful_load_becomes_ready() {
        let loader = Arc::new(CountingLoader::new(ScriptedBackend::echo("ok")));
        let manager = manager(Arc::clone(&loader));

        manager.load_model(Duration::from_secs(5)).unwrap();

        assert_eq!(manager.phase(), LifecyclePhase::Ready);
        assert_eq!(loader.calls(), 1);
        let handle = manager.handle().unwrap();
        assert_eq!(handle.info().model_name, "test-model");
        assert_eq!(handle.info().device, "cpu");
        assert_eq!(manager.metrics.model.lifecycle_phase.get(), 2);
    }

    #[test]
    fn test_concurrent_load_is_rejected() {
        let (loader, release) = gated_loader(ScriptedBackend::echo("ok"));
        let manager = Arc::new(manager(Arc::clone(&loader)));

        let first = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.load_model(Duration::from_secs(10)))
        };
        wait_for_phase(&manager, LifecyclePhase::Loading);

        let second = manager.load_model(Duration::from_secs(10));
        assert!(matches!(second, Err(LlmServeError::AlreadyLoading)));

        release.send(()).unwrap();
        first.join().unwrap().unwrap();

        assert_eq!(manager.phase(), LifecyclePhase::Ready);
        assert_eq!(loader.calls(), 1);
    }

    #[test]
    fn test_timeout_fails_and_state_reads_stay_fast() {
        let (loader, _release) = gated_loader(ScriptedBackend::echo("ok"));
        let manager = Arc::new(manager(loader));

        let loading = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.load_model(Duration::from_millis(200)))
        };
        wait_for_phase(&manager, LifecyclePhase::Loading);

        for _ in 0..20 {
            let start = Instant::now();
            let _ = manager.state();
            assert!(start.elapsed() < Duration::from_millis(50));
            thread::sleep(Duration::from_millis(2));
        }

        let result = loading.join().unwrap();
        assert!(matches!(result, Err(LlmServeError::LoadTimeout(_))));
        match manager.state() {
            LifecycleState::Failed(LoadFailure::Timeout(deadline)) => {
                assert_eq!(deadline, Duration::from_millis(200))
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_resolution_failure_skips_loader() {
        let loader = Arc::new(CountingLoader::new(ScriptedBackend::echo("ok")));
        let manager = LifecycleManager::new(
            "missing-model",
            "CausalLM",
            Arc::new(BrokenResolver),
            Arc::clone(&loader) as Arc<dyn ModelLoader>,
            Arc::new(MetricsRegistry::new().unwrap()),
        );

        let result = manager.load_model(Duration::from_secs(5));

        assert!(matches!(result, Err(LlmServeError::Configuration(_))));
        assert!(matches!(
            manager.state(),
            LifecycleState::Failed(LoadFailure::Configuration(_))
        ));
        assert_eq!(loader.calls(), 0);
    }

    #[test]
    fn test_loader_error_is_load_failure() {
        let loader = Arc::new(CountingLoader::failing("corrupt tokenizer.json"));
        let manager = manager(Arc::clone(&loader));

        let result = manager.load_model(Duration::from_secs(5));

        assert!(matches!(result, Err(LlmServeError::LoadFailure(_))));
        match manager.state() {
            LifecycleState::Failed(LoadFailure::Backend(msg)) => {
                assert!(msg.contains("corrupt tokenizer.json"))
            }
            other => panic!("unexpected state: {:?}", other),
        }
        assert!(manager.handle().is_err());
    }

    #[test]
    fn test_failed_is_terminal_until_reloaded() {
        let loader = Arc::new(CountingLoader::failing("boom"));
        let manager = manager(Arc::clone(&loader));

        let _ = manager.load_model(Duration::from_secs(5));
        thread::sleep(Duration::from_millis(20));

        assert_eq!(manager.phase(), LifecyclePhase::Failed);
        assert_eq!(loader.calls(), 1);
    }

    #[test]
    fn test_panicking_loader_is_load_failure() {
        let manager = LifecycleManager::new(
            "test-model",
            "CausalLM",
            Arc::new(FixedResolver),
            Arc::new(PanickingLoader),
            Arc::new(MetricsRegistry::new().unwrap()),
        );

        let result = manager.load_model(Duration::from_secs(5));

        assert!(matches!(result, Err(LlmServeError::LoadFailure(_))));
        match manager.state() {
            LifecycleState::Failed(failure) => {
                assert_eq!(failure, LoadFailure::Backend("loader panicked".to_string()))
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_abandoned_worker_blocks_reload_until_it_exits() {
        let (loader, release) = uncancellable_loader(ScriptedBackend::echo("ok"));
        let manager = manager(Arc::clone(&loader));

        let first = manager.load_model(Duration::from_millis(50));
        assert!(matches!(first, Err(LlmServeError::LoadTimeout(_))));
        assert_eq!(manager.phase(), LifecyclePhase::Failed);

        let retry = manager.load_model(Duration::from_millis(50));
        assert!(matches!(retry, Err(LlmServeError::AlreadyLoading)));
        assert_eq!(loader.calls(), 1);
        assert_eq!(manager.phase(), LifecyclePhase::Failed);

        release.send(()).unwrap();
        let start = Instant::now();
        while manager.load_in_flight.load(Ordering::Acquire) {
            assert!(start.elapsed() < Duration::from_secs(5), "worker never released the slot");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_load_when_ready_is_noop() {
        let loader = Arc::new(CountingLoader::new(ScriptedBackend::echo("ok")));
        let manager = manager(Arc::clone(&loader));

        manager.load_model(Duration::from_secs(5)).unwrap();
        manager.load_model(Duration::from_secs(5)).unwrap();

        assert_eq!(loader.calls(), 1);
        assert_eq!(manager.phase(), LifecyclePhase::Ready);
    }
}
