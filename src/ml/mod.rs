/// Feature transformation, training and serving for fare prediction
///
/// This module provides:
/// - A single feature transformer shared by training (fit) and serving (apply)
/// - Random-forest regression with a cross-validated grid search
/// - Held-out evaluation (MAE, MSE, R², binned confusion report)
/// - Versioned artifact bundles and their on-disk encoding
/// - The training orchestrator and the inference adapter

pub mod bundle;
pub mod evaluation;
pub mod features;
pub mod inference;
pub mod models;
pub mod regressor;
pub mod search;
pub mod training;

pub use bundle::{ArtifactBundle, BundleManifest, CommittedBundle, MemberKind, ModelArtifact};
pub use features::{
    FeatureSchema, FeatureTransformer, FittedTransform, ScalerState, TransformedTable, Vocabulary,
};
pub use inference::{InferenceAdapter, PredictionOutcome};
pub use models::{
    BinnedConfusion, CandidateScore, ForestParams, RegressionMetrics, TrainingDataset,
    TrainingReport,
};
pub use regressor::{ForestRegressor, Regressor};
pub use training::{TrainingOrchestrator, TrainingStage, TrainingStatus};
