use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::ml::{BinnedConfusion, BundleManifest, TrainingReport, TrainingStatus};
use crate::models::{FieldValue, RawRecord};
use crate::state::VersionId;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let model_version = state
        .store
        .latest_version(state.inference.bundle_name())
        .await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        model_version,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub model_version: Option<VersionId>,
}

/// Prometheus text exposition
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::gather_metrics(),
    )
}

/// Run a training pass and commit a new bundle
pub async fn train(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TrainRequest>, JsonRejection>,
) -> Result<Json<TrainResponse>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    request.validate()?;

    // Detached so a dropped request cannot abandon a run mid-stage
    let orchestrator = state.orchestrator.clone();
    let report = tokio::spawn(async move { orchestrator.train(&request.source).await })
        .await
        .map_err(|e| AppError::Internal(format!("Training task failed: {}", e)))??;

    Ok(Json(TrainResponse {
        status: "Success".to_string(),
        mae: report.metrics.mae,
        mse: report.metrics.mse,
        r2: report.metrics.r2,
        confusion: report.confusion.clone(),
        report,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct TrainRequest {
    #[validate(length(min = 1))]
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct TrainResponse {
    pub status: String,
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "MSE")]
    pub mse: f64,
    #[serde(rename = "R2")]
    pub r2: f64,
    pub confusion: BinnedConfusion,
    pub report: TrainingReport,
}

/// Current training stage and last outcome
pub async fn training_status(State(state): State<AppState>) -> Json<TrainingStatus> {
    Json(state.orchestrator.status())
}

/// Predict the fare for one trip
pub async fn predict(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>> {
    let Json(request) = payload.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    request
        .validate()
        .map_err(|e| AppError::InvalidInput(e.to_string()))?;

    let outcome = state.inference.predict(&request.into_record()).await?;

    Ok(Json(PredictResponse {
        status: "Success".to_string(),
        predicted_price: outcome.predicted_price,
        version: outcome.version,
    }))
}

/// The 13 raw fields of a prediction request, under their dataset names.
/// Categorical fields take text or a number; numbers are read as their
/// canonical text.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PredictRequest {
    #[serde(rename = "Airline")]
    #[validate(custom(function = "validate_category"))]
    pub airline: FieldValue,
    #[serde(rename = "Source")]
    #[validate(custom(function = "validate_category"))]
    pub source: FieldValue,
    #[serde(rename = "Destination")]
    #[validate(custom(function = "validate_category"))]
    pub destination: FieldValue,
    #[serde(rename = "Route")]
    #[validate(custom(function = "validate_category"))]
    pub route: FieldValue,
    #[serde(rename = "Total_Stops")]
    #[validate(custom(function = "validate_category"))]
    pub total_stops: FieldValue,
    #[serde(rename = "Additional_Info")]
    #[validate(custom(function = "validate_category"))]
    pub additional_info: FieldValue,
    #[serde(rename = "Duration")]
    #[validate(range(min = 0.0))]
    pub duration: f64,
    #[serde(rename = "Journey_day")]
    #[validate(range(min = 1, max = 31))]
    pub journey_day: u32,
    #[serde(rename = "Journey_month")]
    #[validate(range(min = 1, max = 12))]
    pub journey_month: u32,
    #[serde(rename = "Dep_Time_hour")]
    #[validate(range(max = 23))]
    pub dep_time_hour: u32,
    #[serde(rename = "Dep_Time_minute")]
    #[validate(range(max = 59))]
    pub dep_time_minute: u32,
    #[serde(rename = "Arrival_Time_hour")]
    #[validate(range(max = 23))]
    pub arrival_time_hour: u32,
    #[serde(rename = "Arrival_Time_minute")]
    #[validate(range(max = 59))]
    pub arrival_time_minute: u32,
}

impl PredictRequest {
    pub fn into_record(self) -> RawRecord {
        RawRecord::new()
            .with("Airline", self.airline)
            .with("Source", self.source)
            .with("Destination", self.destination)
            .with("Route", self.route)
            .with("Total_Stops", self.total_stops)
            .with("Additional_Info", self.additional_info)
            .with("Duration", self.duration)
            .with("Journey_day", self.journey_day)
            .with("Journey_month", self.journey_month)
            .with("Dep_Time_hour", self.dep_time_hour)
            .with("Dep_Time_minute", self.dep_time_minute)
            .with("Arrival_Time_hour", self.arrival_time_hour)
            .with("Arrival_Time_minute", self.arrival_time_minute)
    }
}

fn validate_category(value: &FieldValue) -> std::result::Result<(), ValidationError> {
    match value {
        FieldValue::Text(text) if !text.trim().is_empty() => Ok(()),
        FieldValue::Number(n) if n.is_finite() => Ok(()),
        _ => Err(ValidationError::new("empty_category")),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub status: String,
    pub predicted_price: f64,
    pub version: VersionId,
}

/// Committed versions of a bundle name
pub async fn get_artifacts(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ArtifactsResponse>> {
    let head = state.store.latest_version(&name).await?;
    let versions = state.store.versions(&name).await?;

    Ok(Json(ArtifactsResponse {
        exists: head.is_some(),
        name,
        head,
        versions,
    }))
}

#[derive(Debug, Serialize)]
pub struct ArtifactsResponse {
    pub name: String,
    pub exists: bool,
    pub head: Option<VersionId>,
    pub versions: Vec<BundleManifest>,
}
