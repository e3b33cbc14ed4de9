use serde::Deserialize;

/// Console log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Observability settings: service identity, export endpoint, sampling.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub service_version: Option<String>,
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    /// Extra resource attributes attached to every span.
    #[serde(default)]
    pub resource_attributes: Vec<(String, String)>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        ObservabilityConfig {
            service_name: default_service_name(),
            service_version: None,
            otlp_endpoint: default_otlp_endpoint(),
            sampling_ratio: default_sampling_ratio(),
            log_format: default_log_format(),
            resource_attributes: Vec::new(),
        }
    }
}

fn default_service_name() -> String {
    "palisade".to_string()
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4318/v1/traces".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}
