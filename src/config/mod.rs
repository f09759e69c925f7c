pub mod validation;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

// ---------------------------------------------------------------------------
// server
// ---------------------------------------------------------------------------

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for a non-streaming request body.
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
    /// `None` lets tokio pick one worker per core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_body_limit_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit_bytes(),
            runtime_worker_threads: None,
        }
    }
}

// ---------------------------------------------------------------------------
// stream
// ---------------------------------------------------------------------------

/// Streaming conversion tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_aggregation_interval_ms")]
    pub aggregation_interval_ms: u64,
    #[serde(default = "default_backpressure_threshold")]
    pub backpressure_threshold: usize,
    #[serde(default = "default_backpressure_idle_reset_ms")]
    pub backpressure_idle_reset_ms: u64,
    #[serde(default = "default_backpressure_backoff_ms")]
    pub backpressure_backoff_ms: u64,
    #[serde(default = "default_write_retry_max")]
    pub write_retry_max: u32,
    #[serde(default = "default_write_retry_backoff_ms")]
    pub write_retry_backoff_ms: u64,
    /// Bounded channel between the conversion task and the response body.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// How long a single frame send may wait for channel capacity.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Bound on content kept for call recovery, withheld call text included.
    #[serde(default = "default_accumulation_cap_bytes")]
    pub accumulation_cap_bytes: usize,
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
}

fn default_aggregation_interval_ms() -> u64 {
    35
}
fn default_backpressure_threshold() -> usize {
    64
}
fn default_backpressure_idle_reset_ms() -> u64 {
    100
}
fn default_backpressure_backoff_ms() -> u64 {
    5
}
fn default_write_retry_max() -> u32 {
    3
}
fn default_write_retry_backoff_ms() -> u64 {
    10
}
fn default_channel_capacity() -> usize {
    128
}
fn default_send_timeout_ms() -> u64 {
    5_000
}
fn default_accumulation_cap_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_max_input_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            aggregation_interval_ms: default_aggregation_interval_ms(),
            backpressure_threshold: default_backpressure_threshold(),
            backpressure_idle_reset_ms: default_backpressure_idle_reset_ms(),
            backpressure_backoff_ms: default_backpressure_backoff_ms(),
            write_retry_max: default_write_retry_max(),
            write_retry_backoff_ms: default_write_retry_backoff_ms(),
            channel_capacity: default_channel_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            accumulation_cap_bytes: default_accumulation_cap_bytes(),
            max_input_bytes: default_max_input_bytes(),
        }
    }
}

// ---------------------------------------------------------------------------
// features
// ---------------------------------------------------------------------------

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub enable_function_recovery: bool,
    #[serde(default = "default_usage_multiplier")]
    pub usage_multiplier: f64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Model name reported when the request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_true() -> bool {
    true
}
fn default_usage_multiplier() -> f64 {
    1.0
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_model() -> String {
    "unknown".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            enable_function_recovery: true,
            usage_multiplier: default_usage_multiplier(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            default_model: default_model(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Runtime view
// ---------------------------------------------------------------------------

/// Converter constants, read once from [`AppConfig`] at startup and passed
/// explicitly to every conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConverterSettings {
    pub aggregation_interval: Duration,
    pub accumulation_cap: usize,
    pub max_input_bytes: usize,
    pub usage_multiplier: f64,
    pub enable_function_recovery: bool,
}

impl ConverterSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            aggregation_interval: Duration::from_millis(config.stream.aggregation_interval_ms),
            accumulation_cap: config.stream.accumulation_cap_bytes,
            max_input_bytes: config.stream.max_input_bytes,
            usage_multiplier: config.features.usage_multiplier,
            enable_function_recovery: config.features.enable_function_recovery,
        }
    }
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
