use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{ArtifactStore, InMemoryArtifactStore, SledArtifactStore};
use std::sync::Arc;

/// Create an artifact store based on configuration
pub async fn create_store(config: &StateConfig) -> Result<Arc<dyn ArtifactStore>> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled artifact store");

            let store = SledArtifactStore::new(path, config.max_versions_retained)?;
            Ok(Arc::new(store))
        }

        StateBackend::Memory => {
            tracing::warn!("In-memory artifact store selected; bundles are lost on restart");
            Ok(Arc::new(InMemoryArtifactStore::with_retention(
                config.max_versions_retained,
            )))
        }
    }
}

/// Create an in-memory store (for testing and development)
pub fn create_in_memory_store() -> Arc<dyn ArtifactStore> {
    tracing::info!("Initializing in-memory artifact store");
    Arc::new(InMemoryArtifactStore::new())
}
