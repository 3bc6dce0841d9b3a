pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::ml::{InferenceAdapter, TrainingOrchestrator};
use crate::state::ArtifactStore;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TrainingOrchestrator>,
    pub inference: Arc<InferenceAdapter>,
    pub store: Arc<dyn ArtifactStore>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<TrainingOrchestrator>,
        inference: Arc<InferenceAdapter>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            orchestrator,
            inference,
            store,
            started_at: Instant::now(),
        }
    }
}
