use crate::config::{HttpMethod, ProviderConfig};
use crate::enrichment::enricher::DataProvider;
use crate::enrichment::models::{
    EnricherDescriptor, EnrichmentRequest, ProviderCost, GLOBAL_TENANT_ID,
};
use crate::enrichment::strategy::{FieldKind, TargetShape};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

/// Configuration-driven JSON-over-HTTP provider.
///
/// GET requests carry the parameters as a query string, POST requests as a
/// JSON body. Field mappings pick target fields out of the payload by dotted
/// path (`company.financials.revenue`, `contacts.0.email`).
pub struct HttpJsonProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpJsonProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("enrichment-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Registration metadata derived from the provider configuration
    pub fn descriptor(&self) -> EnricherDescriptor {
        let mut descriptor =
            EnricherDescriptor::new(self.config.name.clone(), self.config.types.clone())
                .for_tenant(self.config.tenant_id.unwrap_or(GLOBAL_TENANT_ID))
                .with_priority(self.config.priority)
                .with_tags(self.config.tags.clone())
                .with_endpoint(self.config.endpoint.clone());

        if let Some(description) = &self.config.description {
            descriptor = descriptor.with_description(description.clone());
        }
        descriptor
    }

    fn provider_error(&self, message: impl Into<String>) -> AppError {
        AppError::provider(self.config.name.clone(), message)
    }

    fn query_pairs(parameters: &Map<String, Value>) -> Vec<(String, String)> {
        parameters
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect()
    }
}

/// Follow a dotted path through objects and arrays
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(payload, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

#[async_trait]
impl DataProvider for HttpJsonProvider {
    async fn fetch(&self, request: &EnrichmentRequest) -> Result<Value> {
        let builder = match self.config.method {
            HttpMethod::Get => self
                .client
                .get(&self.config.endpoint)
                .query(&Self::query_pairs(&request.parameters)),
            HttpMethod::Post => self
                .client
                .post(&self.config.endpoint)
                .json(&request.parameters),
        };

        let builder = self
            .config
            .headers
            .iter()
            .fold(builder, |b, (name, value)| b.header(name.as_str(), value.as_str()))
            .header("x-request-id", request.request_id.as_str());

        debug!(
            request_id = %request.request_id,
            provider = %self.config.name,
            endpoint = %self.config.endpoint,
            "Calling provider"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| self.provider_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.provider_error(format!("HTTP {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| self.provider_error(format!("invalid JSON response: {}", e)))
    }

    fn map_to_target(&self, payload: &Value) -> Result<Value> {
        if self.config.field_mappings.is_empty() {
            return match payload {
                Value::Object(_) => Ok(payload.clone()),
                _ => Err(AppError::Mapping(format!(
                    "provider {} returned a non-object payload",
                    self.config.name
                ))),
            };
        }

        if !payload.is_object() && !payload.is_array() {
            return Err(AppError::Mapping(format!(
                "provider {} returned a scalar payload",
                self.config.name
            )));
        }

        let record: Map<String, Value> = self
            .config
            .field_mappings
            .iter()
            .map(|(field, path)| {
                let value = lookup(payload, path).cloned().unwrap_or(Value::Null);
                (field.clone(), value)
            })
            .collect();
        Ok(Value::Object(record))
    }

    fn target_shape(&self) -> TargetShape {
        if !self.config.target_fields.is_empty() {
            TargetShape::declared(
                self.config
                    .target_fields
                    .iter()
                    .map(|f| (f.clone(), FieldKind::Any)),
            )
        } else if !self.config.field_mappings.is_empty() {
            TargetShape::declared(
                self.config
                    .field_mappings
                    .keys()
                    .map(|f| (f.clone(), FieldKind::Any)),
            )
        } else {
            TargetShape::dynamic()
        }
    }

    fn validate(&self, request: &EnrichmentRequest) -> Result<()> {
        for name in &self.config.required_parameters {
            request.require_parameter(name)?;
        }
        Ok(())
    }

    fn cost(&self, _request: &EnrichmentRequest, _payload: &Value) -> Option<ProviderCost> {
        self.config
            .cost_per_call
            .map(|amount| ProviderCost::new(amount, self.config.cost_currency.clone()))
    }

    fn confidence(&self, _record: &Value) -> Option<f64> {
        self.config.confidence
    }
}
