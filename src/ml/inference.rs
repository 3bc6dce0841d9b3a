use crate::error::{AppError, Result};
use crate::feedback::{PredictionEvent, PredictionSink};
use crate::metrics::{PREDICTIONS_TOTAL, PREDICTION_DURATION_SECONDS};
use crate::ml::bundle::CommittedBundle;
use crate::ml::features::FeatureTransformer;
use crate::ml::regressor::Regressor;
use crate::models::RawRecord;
use crate::state::{ArtifactStore, VersionId};
use ndarray::Array2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Result of one prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOutcome {
    /// Rounded value returned to callers
    pub predicted_price: f64,
    /// Model output at full precision
    pub raw_value: f64,
    pub version: VersionId,
    pub bundle_id: Uuid,
    /// Feature vector in the bundle's feature order
    pub features: Vec<f64>,
}

/// Serves predictions from the latest committed bundle of one name.
///
/// The loaded bundle is cached and shared read-only; the head version is
/// checked on every call and a newer commit is picked up on the next one.
pub struct InferenceAdapter {
    store: Arc<dyn ArtifactStore>,
    bundle_name: String,
    decimal_places: u32,
    sink: Arc<dyn PredictionSink>,
    cache: RwLock<Option<Arc<CommittedBundle>>>,
}

impl InferenceAdapter {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        bundle_name: impl Into<String>,
        decimal_places: u32,
        sink: Arc<dyn PredictionSink>,
    ) -> Self {
        Self {
            store,
            bundle_name: bundle_name.into(),
            decimal_places,
            sink,
            cache: RwLock::new(None),
        }
    }

    pub fn bundle_name(&self) -> &str {
        &self.bundle_name
    }

    /// Predict the price for one raw record
    pub async fn predict(&self, record: &RawRecord) -> Result<PredictionOutcome> {
        let started = Instant::now();
        let result = self.predict_inner(record).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.error_code(),
        };
        PREDICTIONS_TOTAL.with_label_values(&[outcome]).inc();
        PREDICTION_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(started.elapsed().as_secs_f64());

        if let Ok(prediction) = &result {
            self.sink.record(PredictionEvent::new(
                record.clone(),
                prediction.predicted_price,
                prediction.version,
                prediction.bundle_id,
            ));
        }
        result
    }

    async fn predict_inner(&self, record: &RawRecord) -> Result<PredictionOutcome> {
        let bundle = self.current_bundle().await?;

        if bundle.model.feature_names != bundle.feature_order {
            return Err(AppError::Schema(format!(
                "model feature names {:?} differ from bundle feature order {:?}",
                bundle.model.feature_names, bundle.feature_order
            )));
        }

        let features = FeatureTransformer::apply(
            record,
            &bundle.vocabularies,
            &bundle.scaler,
            &bundle.feature_order,
        )
        .map_err(|e| match e {
            AppError::MissingField(field) => {
                AppError::InvalidInput(format!("missing required field '{}'", field))
            }
            other => other,
        })?;

        let matrix = Array2::from_shape_vec((1, features.len()), features.clone())
            .map_err(|e| AppError::Internal(format!("Failed to shape feature vector: {}", e)))?;
        let raw_value = bundle
            .model
            .regressor
            .predict(&matrix)?
            .first()
            .copied()
            .ok_or_else(|| AppError::Internal("model returned no prediction".to_string()))?;

        Ok(PredictionOutcome {
            predicted_price: round_to(raw_value, self.decimal_places),
            raw_value,
            version: bundle.version,
            bundle_id: bundle.bundle_id,
            features,
        })
    }

    /// Cached bundle if it is still the head, otherwise a fresh load
    pub async fn current_bundle(&self) -> Result<Arc<CommittedBundle>> {
        let head = self
            .store
            .latest_version(&self.bundle_name)
            .await?
            .ok_or_else(|| self.unavailable())?;

        let cached = self.cache.read().clone();
        if let Some(cached) = cached {
            if cached.version == head {
                return Ok(cached);
            }
        }

        let loaded = self.store.load(&self.bundle_name).await.map_err(|e| match e {
            AppError::NotFound(_) => self.unavailable(),
            other => other,
        })?;
        debug!(bundle = %self.bundle_name, version = %loaded.version, "Loaded bundle for serving");

        let mut cache = self.cache.write();
        let stale = cache
            .as_ref()
            .map_or(true, |current| current.version < loaded.version);
        if stale {
            *cache = Some(loaded.clone());
        }
        Ok(loaded)
    }

    fn unavailable(&self) -> AppError {
        AppError::ModelUnavailable(format!(
            "no bundle committed under '{}'",
            self.bundle_name
        ))
    }
}

/// Round half away from zero to `places` decimals
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
