use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Artifact store configuration
    pub state: StateConfig,

    /// Raw data location
    #[serde(default)]
    pub data: DataConfig,

    /// Canonical feature schema
    #[serde(default)]
    pub features: FeatureSchemaConfig,

    /// Training orchestrator configuration
    #[serde(default)]
    pub training: TrainingConfig,

    /// Inference adapter configuration
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: FARE_)
            .add_source(
                config::Environment::with_prefix("FARE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            state: StateConfig::default(),
            data: DataConfig::default(),
            features: FeatureSchemaConfig::default(),
            training: TrainingConfig::default(),
            inference: InferenceConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Artifact store backend
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for the embedded database (sled)
    pub path: Option<PathBuf>,

    /// Committed versions kept per bundle name, head included
    #[serde(default = "default_max_versions")]
    pub max_versions_retained: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Sled,
            path: Some(PathBuf::from("./data/artifacts")),
            max_versions_retained: default_max_versions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory that training sources are resolved against
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Ordered column declaration shared by training and inference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSchemaConfig {
    /// Categorical columns, in feature order
    #[serde(default = "default_categorical_columns")]
    pub categorical: Vec<String>,

    /// Numeric columns, in feature order after the categorical block
    #[serde(default = "default_numeric_columns")]
    pub numeric: Vec<String>,

    /// Regression target
    #[serde(default = "default_target_column")]
    pub target: String,

    /// Artifact bundle name used by training and serving
    #[serde(default = "default_bundle_name")]
    pub bundle_name: String,
}

impl Default for FeatureSchemaConfig {
    fn default() -> Self {
        Self {
            categorical: default_categorical_columns(),
            numeric: default_numeric_columns(),
            target: default_target_column(),
            bundle_name: default_bundle_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fraction of cleaned rows held out for evaluation
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,

    /// Seed for the split shuffle and the forest bootstrap
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Cross-validation folds used during the grid search
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,

    /// Grid: number of trees
    #[serde(default = "default_grid_n_trees")]
    pub n_trees: Vec<usize>,

    /// Grid: maximum tree depth
    #[serde(default = "default_grid_max_depth")]
    pub max_depth: Vec<u16>,

    /// Grid: minimum samples per leaf
    #[serde(default = "default_grid_min_samples_leaf")]
    pub min_samples_leaf: Vec<usize>,

    /// Replicate rows from sparse target ranges before the final fit
    #[serde(default)]
    pub balance_target: bool,

    /// Bins used to measure target imbalance
    #[serde(default = "default_bins")]
    pub balance_bins: usize,

    /// Upper bound on per-row replication
    #[serde(default = "default_max_replication")]
    pub max_replication: usize,

    /// Bins of the residual confusion report
    #[serde(default = "default_bins")]
    pub confusion_bins: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            seed: default_seed(),
            cv_folds: default_cv_folds(),
            n_trees: default_grid_n_trees(),
            max_depth: default_grid_max_depth(),
            min_samples_leaf: default_grid_min_samples_leaf(),
            balance_target: false,
            balance_bins: default_bins(),
            max_replication: default_max_replication(),
            confusion_bins: default_bins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Decimal places of the returned prediction
    #[serde(default = "default_decimal_places")]
    pub decimal_places: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            decimal_places: default_decimal_places(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,

    /// Where prediction events are sent
    #[serde(default)]
    pub prediction_sink: PredictionSinkKind,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
            prediction_sink: PredictionSinkKind::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSinkKind {
    #[default]
    Tracing,
    Disabled,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_versions() -> usize {
    5
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_categorical_columns() -> Vec<String> {
    [
        "Airline",
        "Source",
        "Destination",
        "Route",
        "Total_Stops",
        "Additional_Info",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_numeric_columns() -> Vec<String> {
    [
        "Duration",
        "Journey_day",
        "Journey_month",
        "Dep_Time_hour",
        "Dep_Time_minute",
        "Arrival_Time_hour",
        "Arrival_Time_minute",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_target_column() -> String {
    "Price".to_string()
}

fn default_bundle_name() -> String {
    "default".to_string()
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_cv_folds() -> usize {
    5
}

fn default_grid_n_trees() -> Vec<usize> {
    vec![50, 100]
}

fn default_grid_max_depth() -> Vec<u16> {
    vec![10, 20]
}

fn default_grid_min_samples_leaf() -> Vec<usize> {
    vec![1, 2]
}

fn default_bins() -> usize {
    5
}

fn default_max_replication() -> usize {
    10
}

fn default_decimal_places() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "fare-predictor".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_http_port(), 8080);
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_decimal_places(), 2);
        assert!(default_true());
    }

    #[test]
    fn test_canonical_schema_order() {
        let schema = FeatureSchemaConfig::default();
        assert_eq!(schema.categorical.len(), 6);
        assert_eq!(schema.numeric.len(), 7);
        assert_eq!(schema.categorical[0], "Airline");
        assert_eq!(schema.numeric[0], "Duration");
        assert_eq!(schema.target, "Price");
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.state.backend, StateBackend::Sled);
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.features, FeatureSchemaConfig::default());
    }

    #[test]
    fn test_state_backend_default() {
        assert_eq!(StateBackend::default(), StateBackend::Sled);
    }
}
