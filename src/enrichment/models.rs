use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

/// Reserved tenant id for tenant-agnostic enrichers
pub const GLOBAL_TENANT_ID: Uuid = Uuid::nil();

/// Default number of concurrent enrichments in a batch
pub const DEFAULT_BATCH_PARALLELISM: usize = 10;

/// Configuration for the enrichment pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Maximum concurrent enrichments per batch
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Provider call timeout when the request carries no override (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Stop a batch at the first failed item
    #[serde(default)]
    pub fail_fast: bool,

    /// Attach the unmapped provider payload to successful responses
    #[serde(default)]
    pub capture_raw_response: bool,

    /// Capacity of the lifecycle event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            default_timeout_ms: default_timeout_ms(),
            fail_fast: false,
            capture_raw_response: false,
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_parallelism() -> usize {
    DEFAULT_BATCH_PARALLELISM
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_event_buffer() -> usize {
    1024
}

/// Field reconciliation policy applied when combining source and provider data
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum EnrichmentStrategy {
    /// Fill only the fields missing in the source
    #[default]
    Enhance,
    /// Provider values overwrite source values
    Merge,
    /// Provider record replaces the source entirely
    Replace,
    /// Unmapped provider payload, no merge
    Raw,
}

impl EnrichmentStrategy {
    /// Whether the provider payload goes through `map_to_target`
    pub fn requires_mapping(&self) -> bool {
        !matches!(self, EnrichmentStrategy::Raw)
    }
}

fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single enrichment request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnrichmentRequest {
    /// Enrichment type (e.g. "company-profile")
    #[serde(rename = "type")]
    #[validate(length(min = 1, message = "enrichment type is required"))]
    pub enrichment_type: String,

    /// Merge strategy
    #[serde(default)]
    pub strategy: EnrichmentStrategy,

    /// Caller-supplied record to enrich
    #[serde(default)]
    pub source_record: Option<Value>,

    /// Provider parameters (key-ordered)
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Tenant owning the request; `GLOBAL_TENANT_ID` for tenant-agnostic routing
    pub tenant_id: Uuid,

    /// Request id used for correlation
    #[serde(default = "generate_request_id")]
    #[validate(length(min = 1, message = "request id must not be empty"))]
    pub request_id: String,

    /// Who initiated the request
    #[serde(default)]
    pub initiator: Option<String>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Per-request timeout override (milliseconds)
    #[serde(default)]
    #[validate(range(min = 1, message = "timeout must be at least 1ms"))]
    pub timeout_millis: Option<u64>,
}

impl EnrichmentRequest {
    /// Create a request with the default strategy and a generated request id
    pub fn new(enrichment_type: impl Into<String>, tenant_id: Uuid) -> Self {
        Self {
            enrichment_type: enrichment_type.into(),
            strategy: EnrichmentStrategy::default(),
            source_record: None,
            parameters: Map::new(),
            tenant_id,
            request_id: generate_request_id(),
            initiator: None,
            metadata: HashMap::new(),
            timeout_millis: None,
        }
    }

    pub fn with_strategy(mut self, strategy: EnrichmentStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_source(mut self, source: Value) -> Self {
        self.source_record = Some(source);
        self
    }

    /// Attach a typed source record
    pub fn with_source_record<T: Serialize>(mut self, source: &T) -> Result<Self> {
        self.source_record = Some(serde_json::to_value(source)?);
        Ok(self)
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout_millis(mut self, timeout_millis: u64) -> Self {
        self.timeout_millis = Some(timeout_millis);
        self
    }

    /// Whether the request targets the reserved global tenant
    pub fn is_global(&self) -> bool {
        self.tenant_id == GLOBAL_TENANT_ID
    }

    /// Get a parameter as a string slice
    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(Value::as_str)
    }

    /// Get a required, non-null parameter
    pub fn require_parameter(&self, name: &str) -> Result<&Value> {
        match self.parameters.get(name) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(AppError::Validation(format!(
                "missing required parameter '{}'",
                name
            ))),
        }
    }

    /// Enrichment type as used for lookups, cache keys and metric labels
    pub fn type_key(&self) -> String {
        self.enrichment_type.trim().to_lowercase()
    }

    /// Validate the request shape
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.type_key().is_empty() {
            return Err(AppError::Validation(
                "enrichment type is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of an enrichment request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentResponse {
    pub success: bool,

    /// Target-shaped record, or the raw provider payload for `RAW`
    pub enriched_data: Option<Value>,

    /// Unmapped provider payload, only when capture is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_provider_response: Option<Value>,

    pub provider_name: String,

    #[serde(rename = "type")]
    pub enrichment_type: String,

    pub strategy: EnrichmentStrategy,

    /// Number of fields the provider contributed
    pub fields_enriched: usize,

    pub confidence_score: Option<f64>,

    pub cost: Option<f64>,

    pub cost_currency: Option<String>,

    pub message: Option<String>,

    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    pub request_id: String,

    #[serde(default)]
    pub duration_ms: u64,
}

impl EnrichmentResponse {
    /// Create a successful response
    pub fn success(
        request: &EnrichmentRequest,
        provider_name: impl Into<String>,
        enriched_data: Value,
        fields_enriched: usize,
    ) -> Self {
        Self {
            success: true,
            enriched_data: Some(enriched_data),
            raw_provider_response: None,
            provider_name: provider_name.into(),
            enrichment_type: request.enrichment_type.clone(),
            strategy: request.strategy,
            fields_enriched,
            confidence_score: None,
            cost: None,
            cost_currency: None,
            message: None,
            error: None,
            error_code: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            request_id: request.request_id.clone(),
            duration_ms: 0,
        }
    }

    /// Create a failed response from an error
    pub fn failure(
        request: &EnrichmentRequest,
        provider_name: impl Into<String>,
        error: &AppError,
    ) -> Self {
        Self {
            success: false,
            enriched_data: None,
            raw_provider_response: None,
            provider_name: provider_name.into(),
            enrichment_type: request.enrichment_type.clone(),
            strategy: request.strategy,
            fields_enriched: 0,
            confidence_score: None,
            cost: None,
            cost_currency: None,
            message: Some(format!("Enrichment failed: {}", error)),
            error: Some(error.to_string()),
            error_code: Some(error.error_code().to_string()),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            request_id: request.request_id.clone(),
            duration_ms: 0,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn with_cost(mut self, cost: Option<ProviderCost>) -> Self {
        if let Some(cost) = cost {
            self.cost = Some(cost.amount);
            self.cost_currency = Some(cost.currency);
        }
        self
    }

    pub fn with_raw_provider_response(mut self, raw: Value) -> Self {
        self.raw_provider_response = Some(raw);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Add metadata
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Deserialize the enriched data into a typed record
    pub fn enriched_as<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self.enriched_data.clone().ok_or_else(|| {
            AppError::NotFound(format!(
                "response {} carries no enriched data",
                self.request_id
            ))
        })?;
        Ok(serde_json::from_value(data)?)
    }

    /// Whether the response was served from cache
    pub fn is_cache_hit(&self) -> bool {
        self.metadata.get("cache_hit").map(String::as_str) == Some("true")
    }
}

/// Cost charged by a provider for one call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderCost {
    pub amount: f64,
    pub currency: String,
}

impl ProviderCost {
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

/// Registration metadata attached to an enricher instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnricherDescriptor {
    pub provider_name: String,

    /// Owning tenant, `GLOBAL_TENANT_ID` when tenant-agnostic
    #[serde(default)]
    pub tenant_id: Uuid,

    pub supported_types: Vec<String>,

    /// Higher wins
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Endpoint the enricher is exposed under (back-reference only)
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl EnricherDescriptor {
    pub fn new(provider_name: impl Into<String>, supported_types: Vec<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            tenant_id: GLOBAL_TENANT_ID,
            supported_types,
            priority: 0,
            tags: Vec::new(),
            description: None,
            endpoint: None,
        }
    }

    pub fn for_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn is_global(&self) -> bool {
        self.tenant_id == GLOBAL_TENANT_ID
    }

    /// Case-insensitive type match
    pub fn supports(&self, enrichment_type: &str) -> bool {
        let enrichment_type = enrichment_type.trim();
        self.supported_types
            .iter()
            .any(|t| t.trim().eq_ignore_ascii_case(enrichment_type))
    }

    /// Whether the descriptor is visible to the given tenant
    pub fn serves_tenant(&self, tenant_id: Uuid) -> bool {
        self.tenant_id == tenant_id || self.is_global()
    }
}
