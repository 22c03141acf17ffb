use crate::enrichment::cache::EnrichmentCache;
use crate::enrichment::models::{
    EnricherDescriptor, EnrichmentConfig, EnrichmentRequest, EnrichmentResponse, ProviderCost,
    DEFAULT_BATCH_PARALLELISM,
};
use crate::enrichment::strategy::{StrategyMerger, TargetShape};
use crate::error::{AppError, Result};
use crate::events::{EnrichmentEventSink, TracingEventSink};
use crate::metrics::{EnrichmentMetricsSink, PrometheusMetricsSink};
use crate::resiliency::{PassThroughResiliency, ProviderOperation, ResiliencyDecorator};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Enricher serving one provider for a set of types and one tenant (or all)
#[async_trait]
pub trait Enricher: Send + Sync + 'static {
    /// Registration metadata
    fn descriptor(&self) -> &EnricherDescriptor;

    fn provider_name(&self) -> &str {
        &self.descriptor().provider_name
    }

    fn supported_types(&self) -> &[String] {
        &self.descriptor().supported_types
    }

    /// Higher wins
    fn priority(&self) -> i32 {
        self.descriptor().priority
    }

    fn tenant_id(&self) -> Uuid {
        self.descriptor().tenant_id
    }

    /// Case-insensitive type support check
    fn supports(&self, enrichment_type: &str) -> bool {
        self.descriptor().supports(enrichment_type)
    }

    /// Whether the enricher can currently serve requests
    async fn is_ready(&self) -> bool {
        true
    }

    /// Concurrency used by [`Enricher::enrich_batch`]
    fn batch_parallelism(&self) -> usize {
        DEFAULT_BATCH_PARALLELISM
    }

    /// Enrich a single request. Failures come back as failure responses.
    async fn enrich(&self, request: &EnrichmentRequest) -> EnrichmentResponse;

    /// Enrich requests concurrently, responses in input order
    async fn enrich_batch(&self, requests: Vec<EnrichmentRequest>) -> Vec<EnrichmentResponse> {
        let parallelism = self.batch_parallelism().max(1);
        stream::iter(requests)
            .map(|request| async move { self.enrich(&request).await })
            .buffered(parallelism)
            .collect()
            .await
    }
}

/// Third-party data source behind a [`ProviderEnricher`]
#[async_trait]
pub trait DataProvider: Send + Sync + 'static {
    /// Call the external provider
    async fn fetch(&self, request: &EnrichmentRequest) -> Result<Value>;

    /// Map the provider payload into the target shape. Must be pure.
    fn map_to_target(&self, payload: &Value) -> Result<Value>;

    /// Declared fields of the target record
    fn target_shape(&self) -> TargetShape {
        TargetShape::dynamic()
    }

    /// Provider-specific request validation (required parameters, ...)
    fn validate(&self, _request: &EnrichmentRequest) -> Result<()> {
        Ok(())
    }

    /// Cost charged for the call that produced `payload`
    fn cost(&self, _request: &EnrichmentRequest, _payload: &Value) -> Option<ProviderCost> {
        None
    }

    /// Confidence in the mapped record, 0.0 to 1.0
    fn confidence(&self, _record: &Value) -> Option<f64> {
        None
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

/// Enricher orchestrating cache lookup, provider fetch, mapping, merge and
/// cache write for a [`DataProvider`]
pub struct ProviderEnricher<P: DataProvider> {
    descriptor: EnricherDescriptor,
    provider: Arc<P>,
    cache: Option<Arc<EnrichmentCache>>,
    resiliency: Arc<dyn ResiliencyDecorator>,
    metrics: Arc<dyn EnrichmentMetricsSink>,
    events: Arc<dyn EnrichmentEventSink>,
    config: EnrichmentConfig,
}

impl<P: DataProvider> ProviderEnricher<P> {
    pub fn new(descriptor: EnricherDescriptor, provider: P) -> Self {
        Self::from_arc(descriptor, Arc::new(provider))
    }

    /// Build around a shared provider
    pub fn from_arc(descriptor: EnricherDescriptor, provider: Arc<P>) -> Self {
        Self {
            descriptor,
            provider,
            cache: None,
            resiliency: Arc::new(PassThroughResiliency),
            metrics: Arc::new(PrometheusMetricsSink),
            events: Arc::new(TracingEventSink),
            config: EnrichmentConfig::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<EnrichmentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_resiliency(mut self, resiliency: Arc<dyn ResiliencyDecorator>) -> Self {
        self.resiliency = resiliency;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn EnrichmentMetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EnrichmentEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: EnrichmentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    fn check_request(&self, request: &EnrichmentRequest) -> Result<()> {
        request.check()?;

        if !self.descriptor.supports(&request.type_key()) {
            return Err(AppError::Validation(format!(
                "provider {} does not support enrichment type '{}'",
                self.descriptor.provider_name, request.enrichment_type
            )));
        }

        if !self.descriptor.serves_tenant(request.tenant_id) {
            return Err(AppError::Validation(format!(
                "provider {} is not available to tenant {}",
                self.descriptor.provider_name, request.tenant_id
            )));
        }

        self.provider.validate(request)
    }

    /// Provider call through the resiliency decorator, bounded by the timeout
    async fn fetch(&self, request: &EnrichmentRequest) -> Result<Value> {
        let provider = Arc::clone(&self.provider);
        let shared = Arc::new(request.clone());
        let operation: ProviderOperation = Arc::new(move || {
            let provider = Arc::clone(&provider);
            let request = Arc::clone(&shared);
            async move { provider.fetch(&request).await }.boxed()
        });
        let operation = self
            .resiliency
            .decorate(&self.descriptor.provider_name, operation);

        let timeout_ms = request
            .timeout_millis
            .unwrap_or(self.config.default_timeout_ms);

        match tokio::time::timeout(Duration::from_millis(timeout_ms), operation()).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "provider {} did not respond within {}ms",
                self.descriptor.provider_name, timeout_ms
            ))),
        }
    }

    async fn run(&self, request: &EnrichmentRequest, start: Instant) -> Result<EnrichmentResponse> {
        let provider_name = self.descriptor.provider_name.as_str();
        self.check_request(request)?;

        if let Some(cache) = &self.cache {
            if let Some(mut cached) = cache.get(request, provider_name).await {
                cached.request_id = request.request_id.clone();
                cached.duration_ms = start.elapsed().as_millis() as u64;
                // cache hits are never charged
                cached.cost = None;
                cached.cost_currency = None;
                cached.add_metadata("cache_hit", "true");
                return Ok(cached);
            }
        }

        let payload = self.fetch(request).await?;

        let mut mapping_degraded = false;
        let outcome = if request.strategy.requires_mapping() {
            let mapped = match self.provider.map_to_target(&payload) {
                Ok(mapped) => mapped,
                Err(e) => {
                    warn!(
                        request_id = %request.request_id,
                        provider = %provider_name,
                        "Mapping failed, continuing with an empty provider record: {}",
                        e
                    );
                    mapping_degraded = true;
                    Value::Object(Map::new())
                }
            };
            StrategyMerger::merge(
                request.strategy,
                request.source_record.as_ref(),
                &mapped,
                &self.provider.target_shape(),
            )
        } else {
            StrategyMerger::merge(request.strategy, None, &payload, &TargetShape::dynamic())
        };

        let confidence = self.provider.confidence(&outcome.record);
        let mut response = EnrichmentResponse::success(
            request,
            provider_name,
            outcome.record,
            outcome.fields_enriched,
        )
        .with_message(format!("Enriched {} field(s)", outcome.fields_enriched))
        .with_cost(self.provider.cost(request, &payload))
        .with_duration_ms(start.elapsed().as_millis() as u64);

        if let Some(confidence) = confidence {
            response = response.with_confidence(confidence);
        }
        if self.config.capture_raw_response {
            response = response.with_raw_provider_response(payload);
        }

        if mapping_degraded {
            response.add_metadata("mapping_degraded", "true");
        } else if let Some(cache) = &self.cache {
            cache.put(request, provider_name, &response).await;
        }

        Ok(response)
    }
}

#[async_trait]
impl<P: DataProvider> Enricher for ProviderEnricher<P> {
    fn descriptor(&self) -> &EnricherDescriptor {
        &self.descriptor
    }

    async fn is_ready(&self) -> bool {
        self.provider.is_ready().await
    }

    fn batch_parallelism(&self) -> usize {
        self.config.parallelism
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> EnrichmentResponse {
        let start = Instant::now();
        let provider_name = self.descriptor.provider_name.as_str();

        debug!(
            request_id = %request.request_id,
            provider = %provider_name,
            enrichment_type = %request.enrichment_type,
            strategy = %request.strategy,
            "Enrichment started"
        );
        self.events.publish_started(request, provider_name);

        match self.run(request, start).await {
            Ok(response) => {
                self.metrics.record_enrichment(
                    &request.type_key(),
                    provider_name,
                    true,
                    response.duration_ms,
                    response.fields_enriched,
                    response.cost.filter(|_| !response.is_cache_hit()),
                );
                self.events.publish_completed(request, &response);
                info!(
                    request_id = %request.request_id,
                    provider = %provider_name,
                    fields_enriched = response.fields_enriched,
                    cache_hit = response.is_cache_hit(),
                    "Enrichment completed in {}ms",
                    response.duration_ms
                );
                response
            }
            Err(err) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                warn!(
                    request_id = %request.request_id,
                    provider = %provider_name,
                    error_code = err.error_code(),
                    "Enrichment failed: {}",
                    err
                );
                self.metrics.record_error(
                    &request.type_key(),
                    provider_name,
                    err.kind(),
                    duration_ms,
                );
                self.events
                    .publish_failed(request, provider_name, &err, duration_ms);
                EnrichmentResponse::failure(request, provider_name, &err)
                    .with_duration_ms(duration_ms)
            }
        }
    }
}
