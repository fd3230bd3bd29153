//! Liveness reporting

use crate::lifecycle::{LifecycleManager, LifecyclePhase, LifecycleState};
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time view of the model lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub state: LifecyclePhase,
    pub model_name: String,
    /// Failure reason when `state` is `failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthSnapshot {
    pub fn model_loaded(&self) -> bool {
        self.state == LifecyclePhase::Ready
    }
}

/// Reads lifecycle state without touching the generation gate
#[derive(Clone)]
pub struct HealthReporter {
    lifecycle: Arc<LifecycleManager>,
}

impl HealthReporter {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self { lifecycle }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.lifecycle.state();
        let detail = match &state {
            LifecycleState::Failed(reason) => Some(reason.to_string()),
            _ => None,
        };

        HealthSnapshot {
            state: state.phase(),
            model_name: self.lifecycle.model_name().to_string(),
            detail,
        }
    }
}
