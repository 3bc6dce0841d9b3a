use crate::config::TrainingConfig;
use crate::error::{AppError, Result};
use crate::state::VersionId;
use ndarray::{Array1, Array2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Random-forest hyperparameters explored by the grid search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: u16,
    pub min_samples_leaf: usize,
}

impl ForestParams {
    /// Enumerate the grid in a fixed order: trees, then depth, then leaf size
    pub fn grid(config: &TrainingConfig) -> Vec<ForestParams> {
        let mut candidates = Vec::new();
        for &n_trees in &config.n_trees {
            for &max_depth in &config.max_depth {
                for &min_samples_leaf in &config.min_samples_leaf {
                    candidates.push(ForestParams {
                        n_trees,
                        max_depth,
                        min_samples_leaf,
                    });
                }
            }
        }
        candidates
    }
}

impl std::fmt::Display for ForestParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n_trees={} max_depth={} min_samples_leaf={}",
            self.n_trees, self.max_depth, self.min_samples_leaf
        )
    }
}

/// Feature matrix with aligned targets and per-row weights
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// Feature matrix (n_samples × n_features)
    pub features: Array2<f64>,

    /// Regression targets
    pub targets: Array1<f64>,

    /// Sample weights
    pub weights: Array1<f64>,

    /// Number of samples
    pub n_samples: usize,

    /// Number of features
    pub n_features: usize,
}

impl TrainingDataset {
    pub fn new(features: Array2<f64>, targets: Array1<f64>) -> Result<Self> {
        if features.nrows() != targets.len() {
            return Err(AppError::Internal(format!(
                "feature rows ({}) and targets ({}) differ",
                features.nrows(),
                targets.len()
            )));
        }

        let n_samples = features.nrows();
        let n_features = features.ncols();
        Ok(Self {
            features,
            targets,
            weights: Array1::ones(n_samples),
            n_samples,
            n_features,
        })
    }

    /// Rows at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> TrainingDataset {
        TrainingDataset {
            features: self.features.select(Axis(0), indices),
            targets: self.targets.select(Axis(0), indices),
            weights: self.weights.select(Axis(0), indices),
            n_samples: indices.len(),
            n_features: self.n_features,
        }
    }

    /// Shuffle row indices with a seeded generator and split into train/test.
    ///
    /// The test partition holds `round(n * test_size)` rows, at least one when
    /// there are two or more rows, and never all of them.
    pub fn train_test_split(&self, test_size: f64, seed: u64) -> (TrainingDataset, TrainingDataset) {
        let mut indices: Vec<usize> = (0..self.n_samples).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let n_test = if self.n_samples < 2 {
            0
        } else {
            ((self.n_samples as f64 * test_size).round() as usize).clamp(1, self.n_samples - 1)
        };
        let n_train = self.n_samples - n_test;

        (
            self.select(&indices[..n_train]),
            self.select(&indices[n_train..]),
        )
    }

    /// Inverse-frequency weights over equal-width target bins:
    /// `n / (k * count(bin))` with `k` the number of non-empty bins.
    pub fn with_balanced_weights(mut self, bins: usize) -> TrainingDataset {
        if self.n_samples == 0 || bins == 0 {
            return self;
        }

        let assignments = bin_assignments(&self.targets, bins);
        let mut counts = vec![0usize; bins];
        for &b in &assignments {
            counts[b] += 1;
        }
        let occupied = counts.iter().filter(|&&c| c > 0).count() as f64;
        let n = self.n_samples as f64;

        self.weights = assignments
            .iter()
            .map(|&b| n / (occupied * counts[b] as f64))
            .collect();
        self
    }

    /// Expand rows by their weight, `clamp(round(w), 1, max_replication)`
    /// copies each, preserving row order. Resulting weights are all one.
    pub fn replicate_by_weight(&self, max_replication: usize) -> TrainingDataset {
        let max_replication = max_replication.max(1);
        let indices: Vec<usize> = self
            .weights
            .iter()
            .enumerate()
            .flat_map(|(i, &w)| {
                let copies = (w.round() as usize).clamp(1, max_replication);
                std::iter::repeat(i).take(copies)
            })
            .collect();

        let mut expanded = self.select(&indices);
        expanded.weights = Array1::ones(expanded.n_samples);
        expanded
    }
}

/// Equal-width bin index of each value over `[min, max]` of `values`
pub fn bin_assignments(values: &Array1<f64>, bins: usize) -> Vec<usize> {
    let edges = bin_edges(values, bins);
    values.iter().map(|&v| bin_of(v, &edges)).collect()
}

/// `bins + 1` equal-width edges over the range of `values`
pub fn bin_edges(values: &Array1<f64>, bins: usize) -> Vec<f64> {
    let bins = bins.max(1);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() {
        return vec![0.0; bins + 1];
    }

    let width = (max - min) / bins as f64;
    (0..=bins).map(|i| min + width * i as f64).collect()
}

/// Bin index of `value` given edges; out-of-range values are clamped
pub fn bin_of(value: f64, edges: &[f64]) -> usize {
    let bins = edges.len().saturating_sub(1).max(1);
    let min = edges[0];
    let width = (edges[edges.len() - 1] - min) / bins as f64;
    if width <= 0.0 || !value.is_finite() {
        return 0;
    }
    let idx = ((value - min) / width).floor();
    if idx < 0.0 {
        0
    } else {
        (idx as usize).min(bins - 1)
    }
}

/// Held-out regression metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub mse: f64,
    pub r2: f64,
}

/// Per-bin evaluation metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinMetrics {
    pub bin: usize,
    pub lower: f64,
    pub upper: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Actual versus predicted values discretized into equal-width bins over the
/// test-target range. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedConfusion {
    pub bin_edges: Vec<f64>,
    /// `matrix[actual][predicted]`
    pub matrix: Vec<Vec<usize>>,
    pub accuracy: f64,
    pub per_bin: Vec<BinMetrics>,
}

/// Cross-validated score of one grid candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params: ForestParams,
    pub mean_mae: f64,
    pub folds: usize,
}

/// Summary of a successful training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub bundle_name: String,
    pub version: VersionId,
    pub bundle_id: Uuid,
    pub source: String,
    pub rows_loaded: usize,
    pub rows_dropped: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub n_features: usize,
    pub feature_order: Vec<String>,
    pub best_params: ForestParams,
    pub cv_scores: Vec<CandidateScore>,
    pub metrics: RegressionMetrics,
    pub confusion: BinnedConfusion,
    pub duration_ms: u64,
    pub trained_at: chrono::DateTime<chrono::Utc>,
}
