use crate::enrichment::models::EnrichmentConfig;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use uuid::Uuid;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "ENRICHMENT_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Enrichment pipeline configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Response cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// HTTP provider definitions
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Config {
    /// Load configuration from the embedded defaults, the file named by
    /// `ENRICHMENT_CONFIG` (if any) and `ENRICHMENT__*` environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Load configuration with an explicit optional file
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            // Override with environment variables (prefix: ENRICHMENT__)
            .add_source(
                config::Environment::with_prefix("ENRICHMENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.enrichment.parallelism == 0 {
            return Err(AppError::Configuration(
                "enrichment.parallelism must be at least 1".to_string(),
            ));
        }

        if self.enrichment.event_buffer == 0 {
            return Err(AppError::Configuration(
                "enrichment.event_buffer must be at least 1".to_string(),
            ));
        }

        if self.enrichment.default_timeout_ms == 0 {
            return Err(AppError::Configuration(
                "enrichment.default_timeout_ms must be at least 1".to_string(),
            ));
        }

        if self.cache.enabled
            && self.cache.backend == CacheBackendKind::Redis
            && self.cache.redis_url.is_none()
        {
            return Err(AppError::Configuration(
                "cache.redis_url is required for the redis backend".to_string(),
            ));
        }

        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(AppError::Configuration(
                    "provider name must not be empty".to_string(),
                ));
            }
            if provider.endpoint.trim().is_empty() {
                return Err(AppError::Configuration(format!(
                    "provider '{}' has no endpoint",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    InMemory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable response caching
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Entry time-to-live in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum entries for the in-memory backend
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Redis URL for the redis backend
    pub redis_url: Option<String>,

    /// First segment of every cache key
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::default(),
            ttl_secs: default_ttl_secs(),
            max_capacity: default_max_capacity(),
            redis_url: None,
            namespace: default_namespace(),
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
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

/// HTTP method used to call a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Definition of a JSON-over-HTTP provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name used for routing and cache keys
    pub name: String,

    /// Endpoint URL
    pub endpoint: String,

    #[serde(default)]
    pub method: HttpMethod,

    /// Enrichment types served
    pub types: Vec<String>,

    /// Owning tenant, global when absent
    #[serde(default)]
    pub tenant_id: Option<Uuid>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub tags: Vec<String>,

    pub description: Option<String>,

    /// Parameters every request must carry
    #[serde(default)]
    pub required_parameters: Vec<String>,

    /// Extra request headers (API keys, ...)
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Target field -> dotted path in the provider payload
    #[serde(default)]
    pub field_mappings: BTreeMap<String, String>,

    /// Declared target fields; defaults to the mapped fields
    #[serde(default)]
    pub target_fields: Vec<String>,

    /// Cost charged per call
    pub cost_per_call: Option<f64>,

    #[serde(default = "default_currency")]
    pub cost_currency: String,

    /// Fixed confidence reported for this provider's data
    pub confidence: Option<f64>,
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_capacity() -> u64 {
    100_000
}

fn default_namespace() -> String {
    "enrichment".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "enrichment-engine".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::load_from(None).unwrap();

        assert_eq!(config.enrichment.parallelism, 10);
        assert_eq!(config.enrichment.default_timeout_ms, 30_000);
        assert!(!config.enrichment.fail_fast);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.backend, CacheBackendKind::InMemory);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.namespace, "enrichment");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[enrichment]
parallelism = 50
fail_fast = true

[cache]
ttl_secs = 60

[[providers]]
name = "acme-data"
endpoint = "https://api.acme.test/companies"
method = "POST"
types = ["company-profile"]
priority = 100
required_parameters = ["companyId"]
cost_per_call = 0.02

[providers.field_mappings]
name = "company.name"
revenue = "financials.revenue"
"#
        )
        .unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();

        assert_eq!(config.enrichment.parallelism, 50);
        assert!(config.enrichment.fail_fast);
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.providers.len(), 1);

        let provider = &config.providers[0];
        assert_eq!(provider.method, HttpMethod::Post);
        assert_eq!(provider.priority, 100);
        assert_eq!(provider.cost_currency, "USD");
        assert_eq!(
            provider.field_mappings.get("revenue").map(String::as_str),
            Some("financials.revenue")
        );
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.cache.backend = CacheBackendKind::Redis;
        assert!(config.validate().is_err());

        config.cache.redis_url = Some("redis://localhost:6379".to_string());
        assert!(config.validate().is_ok());

        config.enrichment.event_buffer = 0;
        assert!(config.validate().is_err());
        config.enrichment.event_buffer = 16;

        config.enrichment.parallelism = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Config::load_from(Some(Path::new("/nonexistent/enrichment.toml")));
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
