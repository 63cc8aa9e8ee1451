use std::collections::BTreeMap;

use garde::Validate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub server: ServerConfig,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub tracing: TracingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub metrics: MetricsConfig,

    #[garde(skip)]
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[garde(range(min = 1024, max = 65535))]
    pub port: u16,

    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,

    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64, // seconds
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: default_bind(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String, // trace, debug, info, warn, error

    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Component name attached to every request span unless configured otherwise.
pub const DEFAULT_COMPONENT_NAME: &str = "request-telemetry/v0";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct TracingConfig {
    /// Export spans over OTLP. When disabled spans are still created but dropped.
    #[garde(skip)]
    pub enabled: bool,

    #[garde(length(min = 1))]
    pub service_name: String,

    #[garde(length(min = 1))]
    pub component_name: String,

    #[garde(length(min = 1))]
    pub otlp_endpoint: String,

    /// Ratio of root traces that are sampled (0.0-1.0)
    #[garde(range(min = 0.0, max = 1.0))]
    pub sample_rate: f64,

    #[garde(range(min = 1, max = 300))]
    pub export_timeout_secs: u64,

    /// Attach request/response headers to sampled spans
    #[garde(skip)]
    pub capture_headers: bool,

    /// Attach the request body to sampled spans
    #[garde(skip)]
    pub capture_body: bool,

    #[garde(range(min = 1, max = 1_048_576))]
    pub max_body_bytes: usize,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "request-telemetry".to_string(),
            component_name: DEFAULT_COMPONENT_NAME.to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            sample_rate: 1.0,
            export_timeout_secs: 10,
            capture_headers: true,
            capture_body: false,
            max_body_bytes: 16 * 1024,
        }
    }
}

/// Where the `handler` metric label comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathLabel {
    /// The request path as received. Path parameters make this unbounded.
    #[default]
    Raw,
    /// The route template (`/users/{id}`). Only available under `Router::route_layer`.
    MatchedRoute,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct MetricsConfig {
    #[garde(pattern(r"^/"))]
    pub endpoint_path: String,

    #[garde(skip)]
    pub path_label: PathLabel,

    /// Distinct `handler` label values kept before folding into "other"
    #[garde(range(min = 1))]
    pub max_path_labels: usize,

    #[garde(custom(validate_buckets))]
    pub duration_buckets: Vec<f64>,

    #[garde(custom(validate_buckets))]
    pub size_buckets: Vec<f64>,

    #[garde(skip)]
    pub global_labels: BTreeMap<String, String>,

    /// Clients allowed to scrape; `None` allows everyone
    #[garde(skip)]
    pub ip_allowlist: Option<Vec<String>>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/metrics".to_string(),
            path_label: PathLabel::Raw,
            max_path_labels: 200,
            duration_buckets: vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            size_buckets: vec![200.0, 500.0, 900.0, 1500.0],
            global_labels: BTreeMap::new(),
            ip_allowlist: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(alias = "dev", alias = "test")]
    Development,
    Staging,
    #[default]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

fn validate_bind_address(value: &str, _: &()) -> garde::Result {
    value.parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid IP address"))
}

fn validate_buckets(value: &Vec<f64>, _: &()) -> garde::Result {
    if value.is_empty() {
        return Err(garde::Error::new("bucket list must not be empty"));
    }
    if value.windows(2).any(|w| w[0] >= w[1]) {
        return Err(garde::Error::new("bucket bounds must be strictly increasing"));
    }
    Ok(())
}
