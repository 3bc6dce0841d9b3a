use crate::ml::models::{bin_edges, bin_of, BinMetrics, BinnedConfusion, RegressionMetrics};
use ndarray::Array1;

/// Mean absolute error. Zero for empty input.
pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / y_true.len() as f64
}

/// Mean squared error. Zero for empty input.
pub fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64
}

/// Coefficient of determination.
///
/// With a constant `y_true` the total variance is zero; the score is `1.0`
/// for a perfect fit and `0.0` otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();

    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn regression_metrics(y_true: &[f64], y_pred: &[f64]) -> RegressionMetrics {
    RegressionMetrics {
        mae: mean_absolute_error(y_true, y_pred),
        mse: mean_squared_error(y_true, y_pred),
        r2: r2_score(y_true, y_pred),
    }
}

/// Discretize actual and predicted values into `bins` equal-width bins over
/// the range of `y_true` and score the result like a classifier.
pub fn binned_confusion(y_true: &[f64], y_pred: &[f64], bins: usize) -> BinnedConfusion {
    let bins = bins.max(1);
    let edges = bin_edges(&Array1::from(y_true.to_vec()), bins);

    let actual: Vec<usize> = y_true.iter().map(|&v| bin_of(v, &edges)).collect();
    let predicted: Vec<usize> = y_pred.iter().map(|&v| bin_of(v, &edges)).collect();

    let mut matrix = vec![vec![0usize; bins]; bins];
    for (&a, &p) in actual.iter().zip(predicted.iter()) {
        matrix[a][p] += 1;
    }

    let (accuracy, per_bin) = calculate_bin_metrics(&actual, &predicted, &edges);

    BinnedConfusion {
        bin_edges: edges,
        matrix,
        accuracy,
        per_bin,
    }
}

fn calculate_bin_metrics(
    y_true: &[usize],
    y_pred: &[usize],
    edges: &[f64],
) -> (f64, Vec<BinMetrics>) {
    let n_bins = edges.len() - 1;
    let n_samples = y_true.len();
    if n_samples == 0 {
        return (0.0, Vec::new());
    }

    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    let accuracy = correct as f64 / n_samples as f64;

    let per_bin = (0..n_bins)
        .map(|bin| {
            let tp = y_true
                .iter()
                .zip(y_pred.iter())
                .filter(|(t, p)| **t == bin && **p == bin)
                .count();

            let fp = y_pred
                .iter()
                .zip(y_true.iter())
                .filter(|(p, t)| **p == bin && **t != bin)
                .count();

            let fn_count = y_true
                .iter()
                .zip(y_pred.iter())
                .filter(|(t, p)| **t == bin && **p != bin)
                .count();

            let precision = if tp + fp > 0 {
                tp as f64 / (tp + fp) as f64
            } else {
                0.0
            };

            let recall = if tp + fn_count > 0 {
                tp as f64 / (tp + fn_count) as f64
            } else {
                0.0
            };

            let f1_score = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            BinMetrics {
                bin,
                lower: edges[bin],
                upper: edges[bin + 1],
                precision,
                recall,
                f1_score,
                support: y_true.iter().filter(|&&t| t == bin).count(),
            }
        })
        .collect();

    (accuracy, per_bin)
}
