pub mod factory;
pub mod sled_store;
pub mod store;

pub use factory::{create_in_memory_store, create_store};
pub use sled_store::SledArtifactStore;
pub use store::InMemoryArtifactStore;

use crate::error::Result;
use crate::ml::bundle::{ArtifactBundle, BundleManifest, CommittedBundle};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-name bundle version, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl VersionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for versioned artifact bundle storage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist every member of `bundle` and publish it as the new head of
    /// `name`. Readers observe either the previous head or the new one.
    async fn commit(&self, bundle: &ArtifactBundle, name: &str) -> Result<VersionId>;

    /// Latest committed bundle for `name`
    async fn load(&self, name: &str) -> Result<Arc<CommittedBundle>>;

    /// Whether `name` has a committed head
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Head version of `name`, if any
    async fn latest_version(&self, name: &str) -> Result<Option<VersionId>>;

    /// Retained manifests of `name`, oldest first
    async fn versions(&self, name: &str) -> Result<Vec<BundleManifest>>;
}

/// Serializes commits per bundle name
#[derive(Debug, Default, Clone)]
pub struct CommitLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CommitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the returned guard for the whole commit
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Bundle names become key prefixes and must not contain separators
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.chars().any(char::is_control) {
        return Err(crate::error::AppError::InvalidInput(format!(
            "invalid bundle name '{}'",
            name
        )));
    }
    Ok(())
}

/// Version numbers to remove so that at most `retain` remain, never the head
pub(crate) fn versions_to_prune(versions: &[VersionId], head: VersionId, retain: usize) -> Vec<VersionId> {
    let retain = retain.max(1);
    if versions.len() <= retain {
        return Vec::new();
    }

    let mut sorted = versions.to_vec();
    sorted.sort();
    let excess = sorted.len() - retain;
    sorted
        .into_iter()
        .filter(|v| *v != head)
        .take(excess)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_versions_to_prune_keeps_newest() {
        let versions: Vec<VersionId> = (1..=6).map(VersionId).collect();
        let pruned = versions_to_prune(&versions, VersionId(6), 4);

        assert_eq!(pruned, vec![VersionId(1), VersionId(2)]);
    }

    #[test]
    fn test_versions_to_prune_never_removes_head() {
        let versions = vec![VersionId(1), VersionId(2), VersionId(3)];
        let pruned = versions_to_prune(&versions, VersionId(1), 1);

        assert!(!pruned.contains(&VersionId(1)));
        assert_eq!(pruned.len(), 2);
    }

    #[test]
    fn test_versions_to_prune_within_budget() {
        let versions = vec![VersionId(1), VersionId(2)];
        assert!(versions_to_prune(&versions, VersionId(2), 5).is_empty());
    }

    #[tokio::test]
    async fn test_commit_locks_serialize_same_name() {
        let locks = CommitLocks::new();
        let guard = locks.acquire("default").await;

        let contender = locks.clone();
        let blocked = tokio::time::timeout(Duration::from_millis(50), async move {
            contender.acquire("default").await
        })
        .await;
        assert!(blocked.is_err());

        // Other names are independent
        let _other = locks.acquire("other").await;
        drop(guard);
        let _again = locks.acquire("default").await;
    }
}
