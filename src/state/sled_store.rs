use crate::error::{AppError, Result};
use crate::metrics::ARTIFACT_COMMITS_TOTAL;
use crate::ml::bundle::{ArtifactBundle, BundleManifest, CommittedBundle, EncodedBundle, MemberKind};
use crate::state::{validate_name, versions_to_prune, ArtifactStore, CommitLocks, VersionId};
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional};
use std::path::Path;
use std::sync::Arc;
use strum::IntoEnumIterator;

/// Load attempts while commits keep moving the head mid-read
const LOAD_ATTEMPTS: usize = 8;

/// Persistent artifact store using Sled embedded database.
///
/// Layout:
/// - `sequences`: name → last allocated version
/// - `members`: `name/version/member` → bincode member
/// - `manifests`: `name/version` → JSON manifest
/// - `heads`: name → published version
///
/// Members are written and flushed first; the manifest and head are then
/// published together in one transaction.
#[derive(Clone)]
pub struct SledArtifactStore {
    db: Arc<Db>,
    sequences: sled::Tree,
    members: sled::Tree,
    manifests: sled::Tree,
    heads: sled::Tree,
    locks: CommitLocks,
    max_versions_retained: usize,
}

impl SledArtifactStore {
    /// Create a new Sled store at the specified path
    pub fn new<P: AsRef<Path>>(path: P, max_versions_retained: usize) -> Result<Self> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).map_err(|e| {
            AppError::Storage(format!("Failed to open Sled database: {}", e))
        })?;

        let open_tree = |name: &str| {
            db.open_tree(name).map_err(|e| {
                AppError::Storage(format!("Failed to open {} tree: {}", name, e))
            })
        };
        let sequences = open_tree("sequences")?;
        let members = open_tree("members")?;
        let manifests = open_tree("manifests")?;
        let heads = open_tree("heads")?;

        tracing::info!("Initialized Sled artifact store at {:?}", path_ref);

        Ok(Self {
            db: Arc::new(db),
            sequences,
            members,
            manifests,
            heads,
            locks: CommitLocks::new(),
            max_versions_retained,
        })
    }

    fn version_prefix(name: &str, version: VersionId) -> String {
        format!("{}/{:020}", name, version.0)
    }

    fn member_key(name: &str, version: VersionId, kind: MemberKind) -> String {
        format!("{}/{}", Self::version_prefix(name, version), kind.as_ref())
    }

    fn decode_version(bytes: &[u8]) -> Result<VersionId> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| AppError::Storage("corrupt version counter".to_string()))?;
        Ok(VersionId(u64::from_be_bytes(raw)))
    }

    /// Allocate the next version for `name`. Allocated numbers are never
    /// reused, even when the commit they were allocated for never publishes.
    fn allocate_version(&self, name: &str) -> Result<VersionId> {
        let updated = self
            .sequences
            .update_and_fetch(name.as_bytes(), |old| {
                let next = old
                    .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                    .map(u64::from_be_bytes)
                    .unwrap_or(0)
                    + 1;
                Some(next.to_be_bytes().to_vec())
            })?
            .ok_or_else(|| AppError::Storage("version counter vanished".to_string()))?;
        Self::decode_version(&updated)
    }

    /// Write every member of `bundle` under a fresh version and flush. Nothing
    /// becomes visible to readers until `publish`.
    pub async fn stage(&self, bundle: &ArtifactBundle, name: &str) -> Result<VersionId> {
        validate_name(name)?;
        let encoded = bundle.encode()?;
        let version = self.allocate_version(name)?;

        let mut batch = sled::Batch::default();
        for (kind, bytes) in &encoded.members {
            batch.insert(Self::member_key(name, version, *kind).as_bytes(), bytes.as_slice());
        }
        self.members.apply_batch(batch)?;
        self.flush().await?;

        tracing::debug!(bundle = %name, version = %version, "Staged bundle members");
        Ok(version)
    }

    /// Atomically record the manifest for `version` and point the head at it
    pub async fn publish(&self, bundle: &ArtifactBundle, name: &str, version: VersionId) -> Result<BundleManifest> {
        let mut members = Vec::new();
        for kind in MemberKind::iter() {
            let bytes = self
                .members
                .get(Self::member_key(name, version, kind).as_bytes())?
                .ok_or_else(|| {
                    AppError::Storage(format!(
                        "member '{}' of {} v{} was not staged",
                        kind, name, version
                    ))
                })?;
            members.push((kind, bytes.to_vec()));
        }

        let encoded = EncodedBundle {
            bundle_id: bundle.bundle_id,
            feature_order: bundle.feature_order.clone(),
            members,
        };
        let manifest = encoded.manifest(name, version);
        let manifest_bytes = serde_json::to_vec(&manifest)?;
        let manifest_key = Self::version_prefix(name, version);

        (&self.manifests, &self.heads)
            .transaction(|(manifests, heads)| {
                manifests.insert(manifest_key.as_bytes(), manifest_bytes.clone())?;
                heads.insert(name.as_bytes(), version.0.to_be_bytes().to_vec())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| {
                AppError::Storage(format!("Failed to publish {} v{}: {:?}", name, version, e))
            })?;
        self.flush().await?;

        Ok(manifest)
    }

    /// Drop versions beyond the retention budget and unpublished leftovers
    fn prune(&self, name: &str, head: VersionId) -> Result<()> {
        let published: Vec<VersionId> = self
            .manifest_entries(name)?
            .into_iter()
            .map(|m| m.version)
            .collect();

        for old in versions_to_prune(&published, head, self.max_versions_retained) {
            self.manifests.remove(Self::version_prefix(name, old).as_bytes())?;
            self.remove_members(name, old)?;
            tracing::debug!(bundle = %name, version = %old, "Pruned bundle version");
        }

        // Members from commits that never published
        let prefix = format!("{}/", name);
        let mut orphaned = Vec::new();
        for entry in self.members.scan_prefix(prefix.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8_lossy(&key).to_string();
            let version = key
                .split('/')
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
                .map(VersionId);
            if let Some(version) = version {
                if version < head && !published.contains(&version) && !orphaned.contains(&version) {
                    orphaned.push(version);
                }
            }
        }
        for version in orphaned {
            self.remove_members(name, version)?;
        }
        Ok(())
    }

    fn remove_members(&self, name: &str, version: VersionId) -> Result<()> {
        let mut batch = sled::Batch::default();
        for kind in MemberKind::iter() {
            batch.remove(Self::member_key(name, version, kind).as_bytes());
        }
        self.members.apply_batch(batch)?;
        Ok(())
    }

    fn manifest_entries(&self, name: &str) -> Result<Vec<BundleManifest>> {
        let prefix = format!("{}/", name);
        let mut manifests = Vec::new();
        for entry in self.manifests.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            manifests.push(serde_json::from_slice::<BundleManifest>(&value)?);
        }
        manifests.sort_by_key(|m| m.version);
        Ok(manifests)
    }

    fn load_version(&self, name: &str, version: VersionId) -> Result<CommittedBundle> {
        let manifest_bytes = self
            .manifests
            .get(Self::version_prefix(name, version).as_bytes())?
            .ok_or_else(|| {
                AppError::Storage(format!("manifest for {} v{} is missing", name, version))
            })?;
        let manifest: BundleManifest = serde_json::from_slice(&manifest_bytes)?;

        let mut members = Vec::new();
        for kind in MemberKind::iter() {
            if let Some(bytes) = self
                .members
                .get(Self::member_key(name, version, kind).as_bytes())?
            {
                members.push((kind, bytes.to_vec()));
            }
        }

        let bundle = ArtifactBundle::decode(&manifest, &members)?;
        tracing::debug!(bundle = %name, version = %version, "Bundle loaded");

        Ok(CommittedBundle {
            version,
            committed_at: manifest.committed_at,
            bundle,
        })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(|e| {
            AppError::Storage(format!("Failed to flush database: {}", e))
        })?;
        Ok(())
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        self.db.size_on_disk().map_err(|e| {
            AppError::Storage(format!("Failed to get database size: {}", e))
        })
    }
}

#[async_trait]
impl ArtifactStore for SledArtifactStore {
    async fn commit(&self, bundle: &ArtifactBundle, name: &str) -> Result<VersionId> {
        let _guard = self.locks.acquire(name).await;

        let version = self.stage(bundle, name).await?;
        self.publish(bundle, name, version).await?;

        if let Err(e) = self.prune(name, version) {
            tracing::warn!(bundle = %name, error = %e, "Failed to prune old bundle versions");
        }

        ARTIFACT_COMMITS_TOTAL.with_label_values(&[name]).inc();
        tracing::info!(bundle = %name, version = %version, bundle_id = %bundle.bundle_id, "Bundle committed");
        Ok(version)
    }

    async fn load(&self, name: &str) -> Result<Arc<CommittedBundle>> {
        let mut version = self
            .latest_version(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No bundle committed under '{}'", name)))?;

        let mut attempt = 1;
        loop {
            match self.load_version(name, version) {
                Ok(committed) => return Ok(Arc::new(committed)),
                Err(e) => {
                    // A commit can prune the version read above once it publishes a newer head
                    match self.latest_version(name).await? {
                        Some(head) if head != version && attempt < LOAD_ATTEMPTS => {
                            tracing::debug!(
                                bundle = %name,
                                stale = %version,
                                head = %head,
                                "Head moved during load, retrying"
                            );
                            version = head;
                            attempt += 1;
                        }
                        _ => return Err(e),
                    }
                }
            }
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.heads.contains_key(name.as_bytes())?)
    }

    async fn latest_version(&self, name: &str) -> Result<Option<VersionId>> {
        match self.heads.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode_version(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn versions(&self, name: &str) -> Result<Vec<BundleManifest>> {
        self.manifest_entries(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::bundle::tests::sample_bundle;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_commit_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledArtifactStore::new(temp_dir.path(), 5).unwrap();
        let bundle = sample_bundle();

        let version = store.commit(&bundle, "default").await.unwrap();
        assert_eq!(version, VersionId(1));

        let loaded = store.load("default").await.unwrap();
        assert_eq!(loaded.bundle_id, bundle.bundle_id);
        assert_eq!(loaded.vocabularies, bundle.vocabularies);
        assert!(store.exists("default").await.unwrap());
    }

    #[tokio::test]
    async fn test_unpublished_stage_leaves_prior_head() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledArtifactStore::new(temp_dir.path(), 5).unwrap();
        let first = sample_bundle();
        store.commit(&first, "default").await.unwrap();

        let staged = store.stage(&sample_bundle(), "default").await.unwrap();
        assert_eq!(staged, VersionId(2));

        let loaded = store.load("default").await.unwrap();
        assert_eq!(loaded.version, VersionId(1));
        assert_eq!(loaded.bundle_id, first.bundle_id);
        assert_eq!(store.versions("default").await.unwrap().len(), 1);

        // The next commit skips the orphaned number and clears its members
        let next = store.commit(&sample_bundle(), "default").await.unwrap();
        assert_eq!(next, VersionId(3));
        let orphan_key = SledArtifactStore::member_key("default", staged, MemberKind::Model);
        assert!(store.members.get(orphan_key.as_bytes()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_member_fails_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledArtifactStore::new(temp_dir.path(), 5).unwrap();
        store.commit(&sample_bundle(), "default").await.unwrap();

        let key = SledArtifactStore::member_key("default", VersionId(1), MemberKind::Scaler);
        store.members.remove(key.as_bytes()).unwrap();

        assert!(matches!(store.load("default").await, Err(AppError::Storage(_))));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = sample_bundle();
        {
            let store = SledArtifactStore::new(temp_dir.path(), 5).unwrap();
            store.commit(&bundle, "default").await.unwrap();
            store.flush().await.unwrap();
        }

        let store = SledArtifactStore::new(temp_dir.path(), 5).unwrap();
        let loaded = store.load("default").await.unwrap();
        assert_eq!(loaded.bundle_id, bundle.bundle_id);
        assert_eq!(store.latest_version("default").await.unwrap(), Some(VersionId(1)));
    }

    #[tokio::test]
    async fn test_retention_keeps_head() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledArtifactStore::new(temp_dir.path(), 2).unwrap();
        for _ in 0..3 {
            store.commit(&sample_bundle(), "default").await.unwrap();
        }

        let versions: Vec<VersionId> = store
            .versions("default")
            .await
            .unwrap()
            .iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(versions, vec![VersionId(2), VersionId(3)]);
        assert_eq!(store.load("default").await.unwrap().version, VersionId(3));
    }
}
