use fare_predictor::{
    api::{build_router, AppState},
    config::Config,
    feedback::create_sink,
    ingest::FileRecordLoader,
    ml::{FeatureSchema, InferenceAdapter, TrainingOrchestrator},
    state::create_store,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config_result = Config::load();
    let config = config_result.as_ref().cloned().unwrap_or_default();

    init_tracing(&config);

    if let Err(e) = &config_result {
        tracing::warn!("Failed to load configuration: {}", e);
        tracing::warn!("Using default configuration");
    }

    tracing::info!(
        service = %config.observability.service_name,
        "Starting Fare Predictor v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = fare_predictor::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        }
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
    }

    // Initialize artifact store
    tracing::info!("Artifact store backend: {:?}", config.state.backend);
    let store = create_store(&config.state).await?;

    let schema = FeatureSchema::from(&config.features);
    let bundle_name = config.features.bundle_name.clone();
    tracing::info!(
        bundle = %bundle_name,
        features = schema.n_features(),
        "Feature schema loaded"
    );

    // Training orchestrator
    let loader = Arc::new(FileRecordLoader::new(config.data.data_dir.clone()));
    let orchestrator = Arc::new(TrainingOrchestrator::new(
        loader,
        store.clone(),
        schema,
        bundle_name.clone(),
        config.training.clone(),
    ));

    // Inference adapter
    let sink = create_sink(&config.observability.prediction_sink);
    let inference = Arc::new(InferenceAdapter::new(
        store.clone(),
        bundle_name.clone(),
        config.inference.decimal_places,
        sink,
    ));

    match store.latest_version(&bundle_name).await? {
        Some(version) => tracing::info!(bundle = %bundle_name, %version, "Serving committed bundle"),
        None => tracing::warn!(
            bundle = %bundle_name,
            "No committed bundle yet; predictions fail until a training run succeeds"
        ),
    }

    let app = build_router(AppState::new(orchestrator, inference, store)).layer(TimeoutLayer::new(
        Duration::from_secs(config.server.request_timeout_secs),
    ));

    // Start HTTP server
    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Health check: http://{}/health", http_addr);
    tracing::info!("   Predict: http://{}/v1/predict", http_addr);
    tracing::info!("   Train: http://{}/v1/train", http_addr);

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "fare_predictor={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
