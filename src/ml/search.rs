use crate::error::{AppError, Result};
use crate::ml::evaluation::mean_absolute_error;
use crate::ml::models::{CandidateScore, ForestParams, TrainingDataset};
use crate::ml::regressor::{ForestRegressor, Regressor};
use rayon::prelude::*;
use std::ops::Range;
use tracing::{debug, info};

/// Result of a grid search
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: ForestParams,
    /// One entry per candidate in grid order; empty when the search was skipped
    pub scores: Vec<CandidateScore>,
}

/// Exhaustive search over `candidates` scored by cross-validated MAE.
///
/// Folds are contiguous slices of `train`. The fold count is
/// `min(cv_folds, n / 2)`; below two folds the first candidate is returned
/// unscored. Lower MAE wins and ties keep the earlier candidate.
pub fn grid_search(
    train: &TrainingDataset,
    candidates: &[ForestParams],
    cv_folds: usize,
    seed: u64,
) -> Result<SearchOutcome> {
    let first = *candidates
        .first()
        .ok_or_else(|| AppError::Training("hyperparameter grid is empty".to_string()))?;

    let folds = cv_folds.min(train.n_samples / 2);
    if folds < 2 || candidates.len() == 1 {
        debug!(
            folds,
            candidates = candidates.len(),
            "Skipping cross-validation"
        );
        return Ok(SearchOutcome {
            best: first,
            scores: Vec::new(),
        });
    }

    let ranges = fold_ranges(train.n_samples, folds);

    // Collect preserves candidate order regardless of scheduling
    let scores: Vec<CandidateScore> = candidates
        .par_iter()
        .map(|&params| score_candidate(train, params, &ranges, seed))
        .collect::<Result<Vec<_>>>()?;

    let mut best = &scores[0];
    for score in &scores[1..] {
        if score.mean_mae < best.mean_mae {
            best = score;
        }
    }

    info!(
        best = %best.params,
        mean_mae = best.mean_mae,
        folds,
        candidates = scores.len(),
        "Grid search complete"
    );

    Ok(SearchOutcome {
        best: best.params,
        scores,
    })
}

fn score_candidate(
    train: &TrainingDataset,
    params: ForestParams,
    ranges: &[Range<usize>],
    seed: u64,
) -> Result<CandidateScore> {
    let fold_maes = ranges
        .par_iter()
        .map(|held_out| {
            let fit_idx: Vec<usize> = (0..train.n_samples)
                .filter(|i| !held_out.contains(i))
                .collect();
            let val_idx: Vec<usize> = held_out.clone().collect();

            let fit_set = train.select(&fit_idx);
            let val_set = train.select(&val_idx);

            let model = ForestRegressor::fit(&fit_set, params, seed)?;
            let predictions = model
                .predict(&val_set.features)
                .map_err(|e| AppError::Training(e.to_string()))?;

            Ok(mean_absolute_error(&val_set.targets.to_vec(), &predictions))
        })
        .collect::<Result<Vec<f64>>>()?;

    let mean_mae = fold_maes.iter().sum::<f64>() / fold_maes.len() as f64;
    debug!(params = %params, mean_mae, "Scored candidate");

    Ok(CandidateScore {
        params,
        mean_mae,
        folds: fold_maes.len(),
    })
}

/// Contiguous, near-equal fold boundaries covering `0..n`
pub fn fold_ranges(n: usize, folds: usize) -> Vec<Range<usize>> {
    (0..folds)
        .map(|f| (f * n / folds)..((f + 1) * n / folds))
        .collect()
}
