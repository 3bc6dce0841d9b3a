use crate::error::{AppError, Result};
use crate::ml::features::{FeatureSchema, ScalerState, Vocabulary};
use crate::ml::models::ForestParams;
use crate::ml::regressor::{ForestRegressor, Regressor};
use crate::state::VersionId;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::Deref;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

/// Trained regressor together with the feature order it was fit on
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub params: ForestParams,
    pub regressor: ForestRegressor,
}

/// Bundle-level metadata member
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BundleMeta {
    schema: FeatureSchema,
    feature_order: Vec<String>,
    created_at: DateTime<Utc>,
}

/// Vocabularies, scaler state and model produced by one training pass.
///
/// Persisted as separate members that all carry `bundle_id`; a bundle is
/// only ever reassembled from members of a single pass.
#[derive(Debug)]
pub struct ArtifactBundle {
    pub bundle_id: Uuid,
    pub schema: FeatureSchema,
    pub feature_order: Vec<String>,
    pub vocabularies: Vec<Vocabulary>,
    pub scaler: ScalerState,
    pub model: ModelArtifact,
    pub created_at: DateTime<Utc>,
}

/// Persisted members of a bundle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Meta,
    Vocabularies,
    Scaler,
    Model,
}

/// Digest of one persisted member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDigest {
    pub kind: MemberKind,
    pub sha256: String,
    pub size: usize,
}

/// Published description of one committed version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub name: String,
    pub version: VersionId,
    pub bundle_id: Uuid,
    pub committed_at: DateTime<Utc>,
    pub feature_order: Vec<String>,
    pub members: Vec<MemberDigest>,
}

impl BundleManifest {
    pub fn digest_of(&self, kind: MemberKind) -> Option<&MemberDigest> {
        self.members.iter().find(|m| m.kind == kind)
    }
}

/// Encoded members ready to be written
#[derive(Debug, Clone)]
pub struct EncodedBundle {
    pub bundle_id: Uuid,
    pub feature_order: Vec<String>,
    pub members: Vec<(MemberKind, Vec<u8>)>,
}

impl EncodedBundle {
    pub fn digests(&self) -> Vec<MemberDigest> {
        self.members
            .iter()
            .map(|(kind, bytes)| MemberDigest {
                kind: *kind,
                sha256: sha256_hex(bytes),
                size: bytes.len(),
            })
            .collect()
    }

    pub fn manifest(&self, name: &str, version: VersionId) -> BundleManifest {
        BundleManifest {
            name: name.to_string(),
            version,
            bundle_id: self.bundle_id,
            committed_at: Utc::now(),
            feature_order: self.feature_order.clone(),
            members: self.digests(),
        }
    }
}

impl ArtifactBundle {
    /// Assemble a bundle and check that its members agree on feature order
    pub fn new(
        schema: FeatureSchema,
        vocabularies: Vec<Vocabulary>,
        scaler: ScalerState,
        model: ModelArtifact,
    ) -> Result<Self> {
        let bundle = Self {
            bundle_id: Uuid::new_v4(),
            feature_order: schema.feature_order(),
            schema,
            vocabularies,
            scaler,
            model,
            created_at: Utc::now(),
        };
        bundle.check_consistency()?;
        Ok(bundle)
    }

    /// Every feature is covered by exactly one vocabulary or scaler column,
    /// and the model was fit on the bundle's feature order.
    pub fn check_consistency(&self) -> Result<()> {
        if self.model.feature_names != self.feature_order {
            return Err(AppError::Schema(format!(
                "model feature names {:?} differ from bundle feature order {:?}",
                self.model.feature_names, self.feature_order
            )));
        }
        if self.model.regressor.n_features() != self.feature_order.len() {
            return Err(AppError::Schema(format!(
                "model expects {} features, bundle declares {}",
                self.model.regressor.n_features(),
                self.feature_order.len()
            )));
        }

        let vocab_fields: Vec<&str> = self.vocabularies.iter().map(|v| v.field()).collect();
        if vocab_fields != self.schema.categorical.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(AppError::Schema(format!(
                "vocabularies {:?} do not match categorical columns {:?}",
                vocab_fields, self.schema.categorical
            )));
        }
        if self.scaler.column_names() != self.schema.numeric {
            return Err(AppError::Schema(format!(
                "scaler columns {:?} do not match numeric columns {:?}",
                self.scaler.column_names(),
                self.schema.numeric
            )));
        }
        Ok(())
    }

    /// Serialize every member, each tagged with `bundle_id`
    pub fn encode(&self) -> Result<EncodedBundle> {
        let meta = BundleMeta {
            schema: self.schema.clone(),
            feature_order: self.feature_order.clone(),
            created_at: self.created_at,
        };

        let members = vec![
            (MemberKind::Meta, encode_member(&self.bundle_id, &meta)?),
            (
                MemberKind::Vocabularies,
                encode_member(&self.bundle_id, &self.vocabularies)?,
            ),
            (MemberKind::Scaler, encode_member(&self.bundle_id, &self.scaler)?),
            (MemberKind::Model, encode_member(&self.bundle_id, &self.model)?),
        ];

        Ok(EncodedBundle {
            bundle_id: self.bundle_id,
            feature_order: self.feature_order.clone(),
            members,
        })
    }

    /// Rebuild a bundle from stored members, verifying digests against the
    /// manifest and rejecting members from another training pass.
    pub fn decode(manifest: &BundleManifest, members: &[(MemberKind, Vec<u8>)]) -> Result<Self> {
        for kind in MemberKind::iter() {
            let bytes = member_bytes(members, kind)?;
            let recorded = manifest.digest_of(kind).ok_or_else(|| {
                AppError::Storage(format!(
                    "manifest for {} v{} has no digest for member '{}'",
                    manifest.name, manifest.version, kind
                ))
            })?;
            let actual = sha256_hex(bytes);
            if actual != recorded.sha256 {
                return Err(AppError::Storage(format!(
                    "digest mismatch for member '{}' of {} v{}",
                    kind, manifest.name, manifest.version
                )));
            }
        }

        let meta: BundleMeta =
            decode_member(manifest, MemberKind::Meta, member_bytes(members, MemberKind::Meta)?)?;
        let vocabularies: Vec<Vocabulary> = decode_member(
            manifest,
            MemberKind::Vocabularies,
            member_bytes(members, MemberKind::Vocabularies)?,
        )?;
        let scaler: ScalerState = decode_member(
            manifest,
            MemberKind::Scaler,
            member_bytes(members, MemberKind::Scaler)?,
        )?;
        let model: ModelArtifact = decode_member(
            manifest,
            MemberKind::Model,
            member_bytes(members, MemberKind::Model)?,
        )?;

        let bundle = Self {
            bundle_id: manifest.bundle_id,
            schema: meta.schema,
            feature_order: meta.feature_order,
            vocabularies,
            scaler,
            model,
            created_at: meta.created_at,
        };
        bundle.check_consistency()?;
        Ok(bundle)
    }
}

/// A bundle as loaded from the store, with the version it was published as
#[derive(Debug)]
pub struct CommittedBundle {
    pub version: VersionId,
    pub committed_at: DateTime<Utc>,
    pub bundle: ArtifactBundle,
}

impl Deref for CommittedBundle {
    type Target = ArtifactBundle;

    fn deref(&self) -> &Self::Target {
        &self.bundle
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn encode_member<T: Serialize>(bundle_id: &Uuid, value: &T) -> Result<Vec<u8>> {
    bincode::serialize(&(bundle_id, value))
        .map_err(|e| AppError::Serialization(format!("Failed to encode bundle member: {}", e)))
}

fn decode_member<T: DeserializeOwned>(
    manifest: &BundleManifest,
    kind: MemberKind,
    bytes: &[u8],
) -> Result<T> {
    let (bundle_id, value): (Uuid, T) = bincode::deserialize(bytes).map_err(|e| {
        AppError::Serialization(format!("Failed to decode member '{}': {}", kind, e))
    })?;

    if bundle_id != manifest.bundle_id {
        return Err(AppError::Storage(format!(
            "member '{}' belongs to bundle {} but {} v{} is bundle {}",
            kind, bundle_id, manifest.name, manifest.version, manifest.bundle_id
        )));
    }
    Ok(value)
}

fn member_bytes(members: &[(MemberKind, Vec<u8>)], kind: MemberKind) -> Result<&[u8]> {
    members
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, bytes)| bytes.as_slice())
        .ok_or_else(|| AppError::Storage(format!("bundle member '{}' is missing", kind)))
}
