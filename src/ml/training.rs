use crate::config::TrainingConfig;
use crate::error::{AppError, Result};
use crate::ingest::RecordLoader;
use crate::metrics::{TRAINING_DURATION_SECONDS, TRAINING_RUNS_TOTAL};
use crate::ml::bundle::{ArtifactBundle, ModelArtifact};
use crate::ml::evaluation::{binned_confusion, regression_metrics};
use crate::ml::features::{FeatureSchema, FeatureTransformer};
use crate::ml::models::{ForestParams, TrainingDataset, TrainingReport};
use crate::ml::regressor::{ForestRegressor, Regressor};
use crate::ml::search::grid_search;
use crate::state::ArtifactStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use strum::{Display, EnumString};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Stage of the current or most recent training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
pub enum TrainingStage {
    Idle,
    Loading,
    Transforming,
    Searching,
    Evaluating,
    Committing,
    Failed,
}

impl TrainingStage {
    /// Whether a run is in progress
    pub fn is_active(&self) -> bool {
        !matches!(self, TrainingStage::Idle | TrainingStage::Failed)
    }

    pub fn can_transition_to(&self, next: TrainingStage) -> bool {
        use TrainingStage::*;
        match (self, next) {
            (Idle | Failed, Loading) => true,
            (Loading, Transforming) => true,
            (Transforming, Searching) => true,
            (Searching, Evaluating) => true,
            (Evaluating, Committing) => true,
            (Committing, Idle) => true,
            (stage, Failed) => stage.is_active(),
            _ => false,
        }
    }
}

/// Observable state of the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub stage: TrainingStage,
    pub run_id: Option<Uuid>,
    pub source: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_report: Option<TrainingReport>,
    pub last_error: Option<String>,
}

impl Default for TrainingStatus {
    fn default() -> Self {
        Self {
            stage: TrainingStage::Idle,
            run_id: None,
            source: None,
            started_at: None,
            updated_at: Utc::now(),
            last_report: None,
            last_error: None,
        }
    }
}

/// Runs load → transform → search → evaluate → commit.
///
/// Runs are serialized; a failed run commits nothing and leaves the
/// previously committed bundle servable.
pub struct TrainingOrchestrator {
    loader: Arc<dyn RecordLoader>,
    store: Arc<dyn ArtifactStore>,
    schema: FeatureSchema,
    bundle_name: String,
    config: TrainingConfig,
    status: Arc<RwLock<TrainingStatus>>,
    run_lock: Mutex<()>,
}

impl TrainingOrchestrator {
    pub fn new(
        loader: Arc<dyn RecordLoader>,
        store: Arc<dyn ArtifactStore>,
        schema: FeatureSchema,
        bundle_name: impl Into<String>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            loader,
            store,
            schema,
            bundle_name: bundle_name.into(),
            config,
            status: Arc::new(RwLock::new(TrainingStatus::default())),
            run_lock: Mutex::new(()),
        }
    }

    pub fn bundle_name(&self) -> &str {
        &self.bundle_name
    }

    /// Snapshot of the current stage and the last outcome
    pub fn status(&self) -> TrainingStatus {
        self.status.read().clone()
    }

    /// Train on `source` and commit a new bundle version
    pub async fn train(&self, source: &str) -> Result<TrainingReport> {
        let _run = self.run_lock.lock().await;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        {
            let mut status = self.status.write();
            status.run_id = Some(run_id);
            status.source = Some(source.to_string());
            status.started_at = Some(Utc::now());
            status.last_error = None;
        }

        info!(run_id = %run_id, source = %source, bundle = %self.bundle_name, "Training run started");

        let result = self.run(run_id, source, started).await;
        TRAINING_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                self.transition(run_id, TrainingStage::Idle)?;
                self.status.write().last_report = Some(report.clone());
                TRAINING_RUNS_TOTAL.with_label_values(&["success"]).inc();
                info!(
                    run_id = %run_id,
                    version = %report.version,
                    mae = report.metrics.mae,
                    r2 = report.metrics.r2,
                    duration_ms = report.duration_ms,
                    "Training run complete"
                );
            }
            Err(e) => {
                if let Err(transition_err) = self.transition(run_id, TrainingStage::Failed) {
                    warn!(run_id = %run_id, error = %transition_err, "Could not mark run as failed");
                }
                self.status.write().last_error = Some(e.to_string());
                TRAINING_RUNS_TOTAL.with_label_values(&["failed"]).inc();
                error!(run_id = %run_id, error = %e, "Training run failed");
            }
        }

        result
    }

    async fn run(&self, run_id: Uuid, source: &str, started: Instant) -> Result<TrainingReport> {
        self.transition(run_id, TrainingStage::Loading)?;
        let table = self.loader.load(source).await.map_err(|e| match e {
            AppError::DataUnavailable(_) => e,
            other => AppError::DataUnavailable(other.to_string()),
        })?;

        self.transition(run_id, TrainingStage::Transforming)?;
        let fitted = FeatureTransformer::new(self.schema.clone())
            .fit(&table)
            .map_err(|e| match e {
                AppError::EmptyInput(msg) => AppError::DataUnavailable(msg),
                other => other,
            })?;

        let targets = fitted
            .table
            .targets
            .clone()
            .ok_or_else(|| AppError::Configuration("feature schema has no target column".to_string()))?;
        if targets.len() < 2 {
            return Err(AppError::DataUnavailable(format!(
                "training needs at least 2 complete rows, got {}",
                targets.len()
            )));
        }
        check_targets(&targets.to_vec())?;

        let dataset = TrainingDataset::new(fitted.table.features.clone(), targets)?;
        let (train, test) = dataset.train_test_split(self.config.test_fraction, self.config.seed);

        self.transition(run_id, TrainingStage::Searching)?;
        let candidates = ForestParams::grid(&self.config);
        let config = self.config.clone();
        let n_train = train.n_samples;
        let (outcome, regressor) = tokio::task::spawn_blocking(move || {
            let outcome = grid_search(&train, &candidates, config.cv_folds, config.seed)?;

            let fit_set = if config.balance_target {
                train
                    .with_balanced_weights(config.balance_bins)
                    .replicate_by_weight(config.max_replication)
            } else {
                train
            };
            let regressor = ForestRegressor::fit(&fit_set, outcome.best, config.seed)?;
            Ok::<_, AppError>((outcome, regressor))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Training task panicked: {}", e)))??;

        self.transition(run_id, TrainingStage::Evaluating)?;
        let predictions = regressor
            .predict(&test.features)
            .map_err(|e| AppError::Training(format!("evaluation failed: {}", e)))?;
        let y_true = test.targets.to_vec();
        let metrics = regression_metrics(&y_true, &predictions);
        let confusion = binned_confusion(&y_true, &predictions, self.config.confusion_bins);

        let bundle = ArtifactBundle::new(
            self.schema.clone(),
            fitted.vocabularies,
            fitted.scaler,
            ModelArtifact {
                feature_names: fitted.table.feature_order.clone(),
                params: outcome.best,
                regressor,
            },
        )?;

        self.transition(run_id, TrainingStage::Committing)?;
        let version = self.store.commit(&bundle, &self.bundle_name).await?;

        Ok(TrainingReport {
            run_id,
            bundle_name: self.bundle_name.clone(),
            version,
            bundle_id: bundle.bundle_id,
            source: source.to_string(),
            rows_loaded: fitted.table.rows_loaded,
            rows_dropped: fitted.table.rows_dropped,
            n_train,
            n_test: test.n_samples,
            n_features: bundle.feature_order.len(),
            feature_order: bundle.feature_order.clone(),
            best_params: outcome.best,
            cv_scores: outcome.scores,
            metrics,
            confusion,
            duration_ms: started.elapsed().as_millis() as u64,
            trained_at: Utc::now(),
        })
    }

    fn transition(&self, run_id: Uuid, next: TrainingStage) -> Result<()> {
        let mut status = self.status.write();
        let current = status.stage;
        if !current.can_transition_to(next) {
            return Err(AppError::InvalidStateTransition(format!(
                "training stage {} cannot move to {}",
                current, next
            )));
        }

        info!(run_id = %run_id, from = %current, to = %next, "Training stage transition");
        status.stage = next;
        status.updated_at = Utc::now();
        Ok(())
    }
}

/// Targets must be finite and not all equal
fn check_targets(targets: &[f64]) -> Result<()> {
    if let Some(bad) = targets.iter().find(|t| !t.is_finite()) {
        return Err(AppError::Training(format!(
            "target contains a non-finite value ({})",
            bad
        )));
    }

    let first = targets[0];
    if targets.iter().all(|&t| t == first) {
        return Err(AppError::Training(format!(
            "target has zero variance (every value is {})",
            first
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::InMemoryRecordLoader;
    use crate::models::{RawRecord, RawTable};
    use crate::state::InMemoryArtifactStore;

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            n_trees: vec![5],
            max_depth: vec![4],
            min_samples_leaf: vec![1],
            ..Default::default()
        }
    }

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec!["Airline".into()], vec!["Duration".into()]).with_target("Price")
    }

    fn table(rows: &[(&str, f64, f64)]) -> RawTable {
        rows.iter()
            .map(|(a, d, p)| {
                RawRecord::new()
                    .with("Airline", *a)
                    .with("Duration", *d)
                    .with("Price", *p)
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn orchestrator(loader: InMemoryRecordLoader) -> (TrainingOrchestrator, Arc<InMemoryArtifactStore>) {
        let store = Arc::new(InMemoryArtifactStore::new());
        let orchestrator = TrainingOrchestrator::new(
            Arc::new(loader),
            store.clone(),
            schema(),
            "default",
            small_config(),
        );
        (orchestrator, store)
    }

    #[test]
    fn test_stage_transitions() {
        use TrainingStage::*;

        assert!(Idle.can_transition_to(Loading));
        assert!(Failed.can_transition_to(Loading));
        assert!(Searching.can_transition_to(Failed));
        assert!(Committing.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Committing));
        assert!(!Idle.can_transition_to(Failed));
        assert!(!Loading.can_transition_to(Evaluating));
    }

    #[tokio::test]
    async fn test_train_small_table() {
        let loader = InMemoryRecordLoader::new();
        loader.insert(
            "fares",
            table(&[("A", 100.0, 5000.0), ("B", 200.0, 7000.0), ("A", 150.0, 6000.0)]),
        );
        let (orchestrator, store) = orchestrator(loader);

        let report = orchestrator.train("fares").await.unwrap();

        assert_eq!(report.n_train, 2);
        assert_eq!(report.n_test, 1);
        assert!(report.cv_scores.is_empty());
        assert_eq!(report.feature_order, vec!["Airline", "Duration"]);
        assert_eq!(orchestrator.status().stage, TrainingStage::Idle);
        assert!(store.exists("default").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_table_is_data_unavailable() {
        let loader = InMemoryRecordLoader::new();
        loader.insert("empty", RawTable::default());
        let (orchestrator, store) = orchestrator(loader);

        let result = orchestrator.train("empty").await;

        assert!(matches!(result, Err(AppError::DataUnavailable(_))));
        assert_eq!(orchestrator.status().stage, TrainingStage::Failed);
        assert!(orchestrator.status().last_error.is_some());
        assert!(!store.exists("default").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_source_is_data_unavailable() {
        let (orchestrator, _) = orchestrator(InMemoryRecordLoader::new());

        let result = orchestrator.train("missing").await;
        assert!(matches!(result, Err(AppError::DataUnavailable(_))));
    }

    #[tokio::test]
    async fn test_constant_target_is_training_error() {
        let loader = InMemoryRecordLoader::new();
        loader.insert(
            "flat",
            table(&[("A", 100.0, 5000.0), ("B", 200.0, 5000.0), ("C", 150.0, 5000.0)]),
        );
        let (orchestrator, store) = orchestrator(loader);

        let result = orchestrator.train("flat").await;
        assert!(matches!(result, Err(AppError::Training(_))));
        assert!(!store.exists("default").await.unwrap());
    }

    #[tokio::test]
    async fn test_single_row_is_data_unavailable() {
        let loader = InMemoryRecordLoader::new();
        loader.insert("one", table(&[("A", 100.0, 5000.0)]));
        let (orchestrator, _) = orchestrator(loader);

        assert!(matches!(
            orchestrator.train("one").await,
            Err(AppError::DataUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_run_can_be_followed_by_success() {
        let loader = InMemoryRecordLoader::new();
        loader.insert(
            "fares",
            table(&[("A", 100.0, 5000.0), ("B", 200.0, 7000.0), ("A", 150.0, 6000.0)]),
        );
        let (orchestrator, _) = orchestrator(loader);

        assert!(orchestrator.train("missing").await.is_err());
        let report = orchestrator.train("fares").await.unwrap();

        assert_eq!(report.version.as_u64(), 1);
        let status = orchestrator.status();
        assert_eq!(status.stage, TrainingStage::Idle);
        assert!(status.last_error.is_none());
        assert_eq!(status.last_report.unwrap().run_id, report.run_id);
    }

    #[test]
    fn test_check_targets() {
        assert!(check_targets(&[1.0, 2.0]).is_ok());
        assert!(matches!(check_targets(&[1.0, f64::NAN]), Err(AppError::Training(_))));
        assert!(matches!(check_targets(&[3.0, 3.0]), Err(AppError::Training(_))));
    }
}
