/// Concurrency tests: parallel readers, serialized writers

mod common;

use common::*;
use fare_predictor::{
    feedback::NullSink,
    ml::InferenceAdapter,
    state::{ArtifactStore, InMemoryArtifactStore, SledArtifactStore, VersionId},
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_predictions_are_independent() {
    let store = Arc::new(InMemoryArtifactStore::new());
    store.commit(&fitted_bundle(30), "default").await.unwrap();
    let adapter = Arc::new(InferenceAdapter::new(store, "default", 2, Arc::new(NullSink)));

    let records = [trip("IndiGo", 0, 0, 120.0), trip("Jet Airways", 2, 2, 480.0)];
    let expected: Vec<f64> = {
        let mut out = Vec::new();
        for record in &records {
            out.push(adapter.predict(record).await.unwrap().predicted_price);
        }
        out
    };

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let adapter = adapter.clone();
            let record = records[i % 2].clone();
            tokio::spawn(async move { (i % 2, adapter.predict(&record).await.unwrap()) })
        })
        .collect();

    for result in join_all(handles).await {
        let (which, outcome) = result.unwrap();
        assert_eq!(outcome.predicted_price, expected[which]);
        assert_eq!(outcome.version, VersionId(1));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_serialize() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SledArtifactStore::new(dir.path(), 10).unwrap());

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let bundle = fitted_bundle(20 + i);
                let version = store.commit(&bundle, "default").await.unwrap();
                (version, bundle.bundle_id)
            })
        })
        .collect();

    let committed: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let versions: HashSet<VersionId> = committed.iter().map(|(v, _)| *v).collect();
    assert_eq!(versions, (1..=6).map(VersionId).collect());

    // The head is the highest version, and loads as that exact bundle
    let (_, head_id) = committed.iter().max_by_key(|(v, _)| *v).unwrap();
    let loaded = store.load("default").await.unwrap();
    assert_eq!(loaded.version, VersionId(6));
    assert_eq!(loaded.bundle_id, *head_id);
    assert_eq!(store.versions("default").await.unwrap().len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_predictions_during_retrain_see_whole_bundles() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let orchestrator = Arc::new(orchestrator_with(store.clone(), "s", sample_table(40)));
    orchestrator.train("s").await.unwrap();

    let adapter = Arc::new(InferenceAdapter::new(
        store.clone(),
        "default",
        2,
        Arc::new(NullSink),
    ));

    let trainer = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.train("s").await.unwrap() })
    };

    let readers: Vec<_> = (0..32)
        .map(|i| {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .predict(&trip(AIRLINES[i % AIRLINES.len()], i, i, 150.0))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let report = trainer.await.unwrap();
    for outcome in join_all(readers).await {
        let outcome = outcome.unwrap();
        assert!(outcome.version == VersionId(1) || outcome.version == report.version);
        assert!(outcome.predicted_price.is_finite());
    }
    assert_eq!(report.version, VersionId(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sled_predictions_during_retrain_see_whole_bundles() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SledArtifactStore::new(dir.path(), 1).unwrap());
    let orchestrator = Arc::new(orchestrator_with(store.clone(), "s", sample_table(40)));
    orchestrator.train("s").await.unwrap();

    let adapter = Arc::new(InferenceAdapter::new(
        store.clone(),
        "default",
        2,
        Arc::new(NullSink),
    ));

    let trainer = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.train("s").await.unwrap() })
    };

    let readers: Vec<_> = (0..32)
        .map(|i| {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                adapter
                    .predict(&trip(AIRLINES[i % AIRLINES.len()], i, i, 150.0))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let report = trainer.await.unwrap();
    for outcome in join_all(readers).await {
        let outcome = outcome.unwrap();
        assert!(outcome.version == VersionId(1) || outcome.version == report.version);
        assert!(outcome.predicted_price.is_finite());
    }
    assert_eq!(report.version, VersionId(2));
    assert_eq!(store.versions("default").await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sled_loads_survive_pruning_commits() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SledArtifactStore::new(dir.path(), 1).unwrap());
    let bundles = [fitted_bundle(20), fitted_bundle(24), fitted_bundle(28)];

    let first = store.commit(&bundles[0], "default").await.unwrap();
    let mut committed = HashMap::from([(first, bundles[0].bundle_id)]);

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while !done.load(Ordering::Acquire) {
                    let loaded = store.load("default").await.unwrap();
                    seen.push((loaded.version, loaded.bundle_id));
                    tokio::task::yield_now().await;
                }
                seen
            })
        })
        .collect();

    for i in 1..30 {
        let bundle = &bundles[i % bundles.len()];
        let version = store.commit(bundle, "default").await.unwrap();
        committed.insert(version, bundle.bundle_id);
    }
    done.store(true, Ordering::Release);

    for seen in join_all(readers).await {
        for (version, bundle_id) in seen.unwrap() {
            assert_eq!(committed.get(&version), Some(&bundle_id));
        }
    }
    assert_eq!(store.latest_version("default").await.unwrap(), Some(VersionId(30)));
    assert_eq!(store.versions("default").await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_training_runs_do_not_overlap() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let orchestrator = Arc::new(orchestrator_with(store.clone(), "s", sample_table(30)));

    let runs: Vec<_> = (0..3)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.train("s").await.unwrap().version })
        })
        .collect();

    let versions: HashSet<VersionId> = join_all(runs)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(versions.len(), 3);
    assert_eq!(store.latest_version("default").await.unwrap(), Some(VersionId(3)));
}
