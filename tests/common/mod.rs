//! Shared fixtures for the integration tests

#![allow(dead_code)]

use fare_predictor::{
    config::{FeatureSchemaConfig, TrainingConfig},
    ingest::InMemoryRecordLoader,
    ml::{
        ArtifactBundle, FeatureSchema, FeatureTransformer, ForestParams, ForestRegressor,
        ModelArtifact, TrainingDataset, TrainingOrchestrator,
    },
    models::{RawRecord, RawTable},
    state::ArtifactStore,
};
use std::sync::Arc;

pub const AIRLINES: [&str; 4] = ["IndiGo", "Air India", "Jet Airways", "SpiceJet"];
pub const CITIES: [(&str, &str, &str); 3] = [
    ("Banglore", "New Delhi", "BLR → DEL"),
    ("Kolkata", "Banglore", "CCU → BLR"),
    ("Delhi", "Cochin", "DEL → BOM → COK"),
];
pub const STOPS: [&str; 3] = ["non-stop", "1 stop", "2 stops"];

/// The canonical 13-feature schema with `Price` as target
pub fn canonical_schema() -> FeatureSchema {
    FeatureSchema::from(&FeatureSchemaConfig::default())
}

/// Grid and folds small enough to keep training fast
pub fn small_training_config() -> TrainingConfig {
    TrainingConfig {
        cv_folds: 3,
        n_trees: vec![5],
        max_depth: vec![6],
        min_samples_leaf: vec![1],
        ..TrainingConfig::default()
    }
}

/// A complete request-shaped record without a price
pub fn trip(airline: &str, route_idx: usize, stops_idx: usize, duration: f64) -> RawRecord {
    let (source, destination, route) = CITIES[route_idx % CITIES.len()];
    RawRecord::new()
        .with("Airline", airline)
        .with("Source", source)
        .with("Destination", destination)
        .with("Route", route)
        .with("Total_Stops", STOPS[stops_idx % STOPS.len()])
        .with("Additional_Info", "No info")
        .with("Duration", duration)
        .with("Journey_day", 24u32)
        .with("Journey_month", 3u32)
        .with("Dep_Time_hour", 22u32)
        .with("Dep_Time_minute", 20u32)
        .with("Arrival_Time_hour", 1u32)
        .with("Arrival_Time_minute", 10u32)
}

/// Deterministic table whose price grows with stops and duration
pub fn sample_table(rows: usize) -> RawTable {
    RawTable::new(
        (0..rows)
            .map(|i| {
                let airline = AIRLINES[i % AIRLINES.len()];
                let stops = i % STOPS.len();
                let duration = 90.0 + (i % 17) as f64 * 25.0;
                let price = 3000.0 + stops as f64 * 2500.0 + duration * 8.0 + (i % 4) as f64 * 300.0;
                trip(airline, i % CITIES.len(), stops, duration).with("Price", price)
            })
            .collect(),
    )
}

/// Orchestrator over an in-memory loader preloaded with `source`
pub fn orchestrator_with(
    store: Arc<dyn ArtifactStore>,
    source: &str,
    table: RawTable,
) -> TrainingOrchestrator {
    let loader = Arc::new(InMemoryRecordLoader::new());
    loader.insert(source, table);
    TrainingOrchestrator::new(
        loader,
        store,
        canonical_schema(),
        "default",
        small_training_config(),
    )
}

/// A bundle fitted directly, bypassing the orchestrator
pub fn fitted_bundle(rows: usize) -> ArtifactBundle {
    let schema = canonical_schema();
    let fitted = FeatureTransformer::new(schema.clone())
        .fit(&sample_table(rows))
        .unwrap();
    let dataset =
        TrainingDataset::new(fitted.table.features, fitted.table.targets.unwrap()).unwrap();
    let params = ForestParams {
        n_trees: 3,
        max_depth: 4,
        min_samples_leaf: 1,
    };
    let regressor = ForestRegressor::fit(&dataset, params, 7).unwrap();

    ArtifactBundle::new(
        schema,
        fitted.vocabularies,
        fitted.scaler,
        ModelArtifact {
            feature_names: fitted.table.feature_order,
            params,
            regressor,
        },
    )
    .unwrap()
}
