//! Airfare price prediction.
//!
//! One feature transformer is shared by training and serving. Training fits it,
//! selects a random forest by cross-validated grid search and commits the
//! vocabularies, scaler and model as a single versioned bundle. Serving loads
//! the latest committed bundle and applies the identical transform to each
//! request.

pub mod api;
pub mod config;
pub mod error;
pub mod feedback;
pub mod ingest;
pub mod metrics;
pub mod ml;
pub mod models;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
