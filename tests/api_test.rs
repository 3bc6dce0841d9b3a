/// HTTP API tests driven through the router with `tower::ServiceExt::oneshot`

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::*;
use fare_predictor::{
    api::{build_router, AppState},
    feedback::NullSink,
    ml::InferenceAdapter,
    state::{ArtifactStore, InMemoryArtifactStore},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> (Router, Arc<InMemoryArtifactStore>) {
    let store = Arc::new(InMemoryArtifactStore::new());
    let orchestrator = Arc::new(orchestrator_with(store.clone(), "flights.json", sample_table(40)));
    let inference = Arc::new(InferenceAdapter::new(
        store.clone(),
        "default",
        2,
        Arc::new(NullSink),
    ));
    let router = build_router(AppState::new(orchestrator, inference, store.clone()));
    (router, store)
}

fn predict_body() -> Value {
    json!({
        "Airline": "IndiGo",
        "Source": "Banglore",
        "Destination": "New Delhi",
        "Route": "BLR → DEL",
        "Total_Stops": "non-stop",
        "Additional_Info": "No info",
        "Duration": 170,
        "Journey_day": 24,
        "Journey_month": 3,
        "Dep_Time_hour": 22,
        "Dep_Time_minute": 20,
        "Arrival_Time_hour": 1,
        "Arrival_Time_minute": 10
    })
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_reports_model_version() {
    let (router, _) = app();

    let (status, body) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["model_version"].is_null());
}

#[tokio::test]
async fn test_predict_before_training_is_unavailable() {
    let (router, _) = app();

    let (status, body) = send(&router, "POST", "/v1/predict", Some(predict_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "Error");
    assert_eq!(body["error"]["code"], "MODEL_UNAVAILABLE");
}

#[tokio::test]
async fn test_train_then_predict() {
    let (router, store) = app();

    let (status, body) = send(
        &router,
        "POST",
        "/v1/train",
        Some(json!({ "source": "flights.json" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Success");
    assert!(body["MAE"].as_f64().is_some());
    assert!(body["MSE"].as_f64().is_some());
    assert!(body["R2"].as_f64().is_some());
    assert!(body["confusion"]["matrix"].is_array());
    assert_eq!(body["report"]["version"], 1);
    assert!(store.exists("default").await.unwrap());

    let (status, body) = send(&router, "POST", "/v1/predict", Some(predict_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Success");
    assert_eq!(body["version"], 1);

    let price = body["predicted_price"].as_f64().unwrap();
    assert_eq!((price * 100.0).round() / 100.0, price);

    let (status, body) = send(&router, "GET", "/v1/training/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stage"], "Idle");
    assert_eq!(body["source"], "flights.json");
}

#[tokio::test]
async fn test_train_unknown_source_is_unprocessable() {
    let (router, store) = app();

    let (status, body) = send(
        &router,
        "POST",
        "/v1/train",
        Some(json!({ "source": "missing.json" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "DATA_UNAVAILABLE");
    assert!(!store.exists("default").await.unwrap());
}

#[tokio::test]
async fn test_train_rejects_empty_source() {
    let (router, _) = app();

    let (status, body) = send(&router, "POST", "/v1/train", Some(json!({ "source": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_predict_rejects_malformed_requests() {
    let (router, _) = app();

    let mut missing = predict_body();
    missing.as_object_mut().unwrap().remove("Duration");
    let (status, body) = send(&router, "POST", "/v1/predict", Some(missing)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");

    let mut out_of_range = predict_body();
    out_of_range["Journey_month"] = json!(14);
    let (status, body) = send(&router, "POST", "/v1/predict", Some(out_of_range)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_predict_accepts_numeric_categories() {
    let (router, _) = app();
    send(&router, "POST", "/v1/train", Some(json!({ "source": "flights.json" }))).await;

    let mut numeric = predict_body();
    numeric["Total_Stops"] = json!(1);
    let (status, body) = send(&router, "POST", "/v1/predict", Some(numeric)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["predicted_price"].as_f64().unwrap().is_finite());

    let mut null = predict_body();
    null["Airline"] = Value::Null;
    let (status, body) = send(&router, "POST", "/v1/predict", Some(null)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_artifacts_listing() {
    let (router, _) = app();

    let (status, body) = send(&router, "GET", "/v1/artifacts/default", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], false);
    assert_eq!(body["versions"].as_array().unwrap().len(), 0);

    send(&router, "POST", "/v1/train", Some(json!({ "source": "flights.json" }))).await;

    let (_, body) = send(&router, "GET", "/v1/artifacts/default", None).await;
    assert_eq!(body["exists"], true);
    assert_eq!(body["head"], 1);
    assert_eq!(body["versions"][0]["members"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text() {
    let (router, _) = app();

    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
