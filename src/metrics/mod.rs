/// Prometheus metrics for the training and serving pipeline.
///
/// All metrics live in one process-wide registry under the `fare_predictor`
/// namespace and are exported in text format from `/metrics`.
///
/// # Example
/// ```no_run
/// use fare_predictor::metrics::PREDICTIONS_TOTAL;
///
/// PREDICTIONS_TOTAL.with_label_values(&["success"]).inc();
/// ```

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
};

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Training Metrics
    // ============================================================================

    /// Training runs by outcome
    ///
    /// Labels: outcome (success, failed)
    pub static ref TRAINING_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("training_runs_total", "Total number of training runs")
            .namespace("fare_predictor"),
        &["outcome"]
    ).expect("Failed to create TRAINING_RUNS_TOTAL metric");

    /// Wall-clock duration of training runs
    pub static ref TRAINING_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "training_duration_seconds",
            "Training run duration in seconds"
        )
        .namespace("fare_predictor")
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0]),
    ).expect("Failed to create TRAINING_DURATION_SECONDS metric");

    /// Rows discarded during cleaning because a required field was missing
    pub static ref ROWS_DROPPED_TOTAL: Counter = Counter::with_opts(
        Opts::new("rows_dropped_total", "Rows dropped while fitting the feature transform")
            .namespace("fare_predictor")
    ).expect("Failed to create ROWS_DROPPED_TOTAL metric");

    // ============================================================================
    // Serving Metrics
    // ============================================================================

    /// Predictions by outcome
    ///
    /// Labels: outcome (success, error code)
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of prediction requests")
            .namespace("fare_predictor"),
        &["outcome"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Prediction latency, transform and model call included
    pub static ref PREDICTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "prediction_duration_seconds",
            "Prediction duration in seconds"
        )
        .namespace("fare_predictor")
        .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5]),
        &["outcome"]
    ).expect("Failed to create PREDICTION_DURATION_SECONDS metric");

    /// Categorical values mapped to the sentinel code at apply time
    ///
    /// Labels: field
    pub static ref UNSEEN_CATEGORIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("unseen_categories_total", "Categorical values not present in the vocabulary")
            .namespace("fare_predictor"),
        &["field"]
    ).expect("Failed to create UNSEEN_CATEGORIES_TOTAL metric");

    // ============================================================================
    // Artifact Store Metrics
    // ============================================================================

    /// Successful bundle commits
    ///
    /// Labels: bundle
    pub static ref ARTIFACT_COMMITS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("artifact_commits_total", "Total number of committed artifact bundles")
            .namespace("fare_predictor"),
        &["bundle"]
    ).expect("Failed to create ARTIFACT_COMMITS_TOTAL metric");

    /// Application build info
    ///
    /// Labels: version
    pub static ref BUILD_INFO: GaugeVec = GaugeVec::new(
        Opts::new("build_info", "Application build information")
            .namespace("fare_predictor"),
        &["version"]
    ).expect("Failed to create BUILD_INFO metric");
}

/// Register all metrics with the Prometheus registry.
///
/// Call once at startup. A second call fails with `AlreadyReg`.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(TRAINING_RUNS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(TRAINING_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ROWS_DROPPED_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PREDICTIONS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PREDICTION_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(UNSEEN_CATEGORIES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ARTIFACT_COMMITS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(BUILD_INFO.clone()))?;

    BUILD_INFO
        .with_label_values(&[env!("CARGO_PKG_VERSION")])
        .set(1.0);

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Generate Prometheus text format metrics for the /metrics endpoint
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
