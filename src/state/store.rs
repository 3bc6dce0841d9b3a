use crate::error::{AppError, Result};
use crate::metrics::ARTIFACT_COMMITS_TOTAL;
use crate::ml::bundle::{ArtifactBundle, BundleManifest, CommittedBundle, EncodedBundle, MemberKind};
use crate::state::{validate_name, versions_to_prune, ArtifactStore, CommitLocks, VersionId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct NamedHistory {
    next_version: u64,
    head: Option<VersionId>,
    manifests: BTreeMap<VersionId, BundleManifest>,
    members: BTreeMap<VersionId, Vec<(MemberKind, Vec<u8>)>>,
}

/// In-memory artifact store (for tests and ephemeral runs).
///
/// Stores encoded members exactly like the durable backend so loads go
/// through the same digest and bundle-id checks.
#[derive(Clone)]
pub struct InMemoryArtifactStore {
    histories: Arc<DashMap<String, Arc<RwLock<NamedHistory>>>>,
    locks: CommitLocks,
    max_versions_retained: usize,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::with_retention(5)
    }

    pub fn with_retention(max_versions_retained: usize) -> Self {
        Self {
            histories: Arc::new(DashMap::new()),
            locks: CommitLocks::new(),
            max_versions_retained,
        }
    }

    fn history(&self, name: &str) -> Arc<RwLock<NamedHistory>> {
        self.histories
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(NamedHistory::default())))
            .clone()
    }

    /// Write members under a fresh version without publishing them
    pub fn stage(&self, bundle: &ArtifactBundle, name: &str) -> Result<VersionId> {
        validate_name(name)?;
        let encoded = bundle.encode()?;
        let history = self.history(name);
        let mut history = history.write();

        history.next_version += 1;
        let version = VersionId(history.next_version);
        history.members.insert(version, encoded.members);
        Ok(version)
    }

    /// Record the manifest and flip the head to `version`
    pub fn publish(&self, bundle: &ArtifactBundle, name: &str, version: VersionId) -> Result<()> {
        let history = self.history(name);
        let mut history = history.write();

        let members = history.members.get(&version).ok_or_else(|| {
            AppError::Storage(format!("no staged members for {} v{}", name, version))
        })?;
        let encoded = EncodedBundle {
            bundle_id: bundle.bundle_id,
            feature_order: bundle.feature_order.clone(),
            members: members.clone(),
        };
        let manifest = encoded.manifest(name, version);

        history.manifests.insert(version, manifest);
        history.head = Some(version);

        let published: Vec<VersionId> = history.manifests.keys().copied().collect();
        for old in versions_to_prune(&published, version, self.max_versions_retained) {
            history.manifests.remove(&old);
            history.members.remove(&old);
        }
        // Staged but never published
        history.members.retain(|v, _| *v > version || published.contains(v));
        Ok(())
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn commit(&self, bundle: &ArtifactBundle, name: &str) -> Result<VersionId> {
        let _guard = self.locks.acquire(name).await;

        let version = self.stage(bundle, name)?;
        self.publish(bundle, name, version)?;

        ARTIFACT_COMMITS_TOTAL.with_label_values(&[name]).inc();
        tracing::info!(bundle = %name, version = %version, bundle_id = %bundle.bundle_id, "Bundle committed");
        Ok(version)
    }

    async fn load(&self, name: &str) -> Result<Arc<CommittedBundle>> {
        let history = self
            .histories
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| AppError::NotFound(format!("No bundle committed under '{}'", name)))?;

        let (manifest, members) = {
            let history = history.read();
            let head = history
                .head
                .ok_or_else(|| AppError::NotFound(format!("No bundle committed under '{}'", name)))?;
            let manifest = history.manifests.get(&head).cloned().ok_or_else(|| {
                AppError::Storage(format!("manifest for {} v{} is missing", name, head))
            })?;
            let members = history.members.get(&head).cloned().ok_or_else(|| {
                AppError::Storage(format!("members for {} v{} are missing", name, head))
            })?;
            (manifest, members)
        };

        let bundle = ArtifactBundle::decode(&manifest, &members)?;
        tracing::debug!(bundle = %name, version = %manifest.version, "Bundle loaded");

        Ok(Arc::new(CommittedBundle {
            version: manifest.version,
            committed_at: manifest.committed_at,
            bundle,
        }))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.latest_version(name).await?.is_some())
    }

    async fn latest_version(&self, name: &str) -> Result<Option<VersionId>> {
        let Some(history) = self.histories.get(name) else {
            return Ok(None);
        };
        let head = history.read().head;
        Ok(head)
    }

    async fn versions(&self, name: &str) -> Result<Vec<BundleManifest>> {
        let Some(history) = self.histories.get(name) else {
            return Ok(Vec::new());
        };
        let manifests = history.read().manifests.values().cloned().collect();
        Ok(manifests)
    }
}
