use crate::error::{AppError, Result};
use crate::ml::models::{ForestParams, TrainingDataset};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

/// Trait for fitted regressors
pub trait Regressor: Send + Sync {
    /// Predict one value per row
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<f64>>;

    /// Width of the feature vectors the model was fit on
    fn n_features(&self) -> usize;
}

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Random forest regressor backed by smartcore
#[derive(Debug, Serialize, Deserialize)]
pub struct ForestRegressor {
    model: Forest,
    params: ForestParams,
    n_features: usize,
}

impl ForestRegressor {
    /// Fit a forest on `dataset` with a fixed bootstrap seed
    pub fn fit(dataset: &TrainingDataset, params: ForestParams, seed: u64) -> Result<Self> {
        if dataset.n_samples == 0 {
            return Err(AppError::Training(
                "cannot fit a forest on zero rows".to_string(),
            ));
        }
        if dataset.targets.iter().any(|t| !t.is_finite()) {
            return Err(AppError::Training(
                "training targets contain non-finite values".to_string(),
            ));
        }

        let x = ndarray_to_densematrix(&dataset.features);
        let y = dataset.targets.to_vec();

        // Every feature is a split candidate at every node
        let parameters = RandomForestRegressorParameters::default()
            .with_n_trees(params.n_trees.max(1))
            .with_max_depth(params.max_depth)
            .with_min_samples_leaf(params.min_samples_leaf.max(1))
            .with_m(dataset.n_features.max(1))
            .with_seed(seed);

        let model = Forest::fit(&x, &y, parameters)
            .map_err(|e| AppError::Training(format!("Failed to fit random forest: {}", e)))?;

        Ok(Self {
            model,
            params,
            n_features: dataset.n_features,
        })
    }

    pub fn params(&self) -> ForestParams {
        self.params
    }
}

impl Regressor for ForestRegressor {
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
        if features.ncols() != self.n_features {
            return Err(AppError::Schema(format!(
                "model expects {} features, got {}",
                self.n_features,
                features.ncols()
            )));
        }
        if features.nrows() == 0 {
            return Ok(Vec::new());
        }

        let x = ndarray_to_densematrix(features);
        let predictions = self
            .model
            .predict(&x)
            .map_err(|e| AppError::Internal(format!("Prediction failed: {}", e)))?;

        if predictions.iter().any(|p| !p.is_finite()) {
            return Err(AppError::Internal(
                "model produced a non-finite prediction".to_string(),
            ));
        }

        Ok(predictions)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

/// Convert ndarray to smartcore DenseMatrix (row-major)
pub fn ndarray_to_densematrix(arr: &Array2<f64>) -> DenseMatrix<f64> {
    let shape = arr.shape();
    let data: Vec<f64> = arr.iter().copied().collect();
    DenseMatrix::new(shape[0], shape[1], data, false)
}
