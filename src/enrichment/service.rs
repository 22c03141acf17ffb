use crate::config::{CacheBackendKind, CacheConfig, Config};
use crate::enrichment::batch::{BatchExecutor, UNRESOLVED_PROVIDER};
use crate::enrichment::cache::{
    CacheBackend, CacheKeyCodec, EnrichmentCache, EvictionScope, MokaCacheBackend,
    RedisCacheBackend,
};
use crate::enrichment::enricher::{Enricher, ProviderEnricher};
use crate::enrichment::models::{
    EnricherDescriptor, EnrichmentConfig, EnrichmentRequest, EnrichmentResponse,
};
use crate::enrichment::registry::EnricherRegistry;
use crate::error::{AppError, Result};
use crate::events::{
    ChannelEventPublisher, EnrichmentEventSink, EventEnvelope, TracingEventSink,
};
use crate::metrics::{
    init_metrics, EnrichmentMetricsSink, NoopMetricsSink, PrometheusMetricsSink,
};
use crate::providers::HttpJsonProvider;
use crate::resiliency::{PassThroughResiliency, ResiliencyDecorator};
use futures::future::join_all;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Readiness of one registered enricher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderHealth {
    pub provider_name: String,
    pub tenant_id: Uuid,
    pub ready: bool,
}

/// Service statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub enricher_count: usize,
    pub global_enrichers: usize,
    pub tenant_enrichers: usize,
    pub cache_enabled: bool,
    pub cache_backend: Option<String>,
    pub cache_ttl_secs: Option<u64>,
    pub parallelism: usize,
    pub fail_fast: bool,
}

/// Entry point wiring registry, cache and batch execution together
pub struct EnrichmentService {
    registry: Arc<EnricherRegistry>,
    cache: Option<Arc<EnrichmentCache>>,
    executor: BatchExecutor,
    config: EnrichmentConfig,
}

impl EnrichmentService {
    /// Create a service around an existing registry
    pub fn new(
        registry: Arc<EnricherRegistry>,
        cache: Option<Arc<EnrichmentCache>>,
        config: EnrichmentConfig,
    ) -> Self {
        let executor = BatchExecutor::from_config(Arc::clone(&registry), &config);
        Self {
            registry,
            cache,
            executor,
            config,
        }
    }

    /// Build the service from configuration, logging lifecycle events
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::builder(config).build().await
    }

    /// Build the service from configuration, publishing lifecycle events on
    /// a channel of `enrichment.event_buffer` capacity
    pub async fn from_config_with_channel(
        config: &Config,
    ) -> Result<(Self, mpsc::Receiver<EventEnvelope>)> {
        let (publisher, receiver) = ChannelEventPublisher::new(config.enrichment.event_buffer);
        let publisher = publisher.with_source(config.observability.service_name.clone());
        let service = Self::builder(config)
            .with_events(Arc::new(publisher))
            .build()
            .await?;
        Ok((service, receiver))
    }

    /// Configuration-driven construction with custom collaborators
    pub fn builder(config: &Config) -> EnrichmentServiceBuilder<'_> {
        EnrichmentServiceBuilder {
            config,
            events: None,
            resiliency: None,
        }
    }

    async fn build_cache(config: &CacheConfig) -> Result<Option<EnrichmentCache>> {
        if !config.enabled {
            return Ok(None);
        }

        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::InMemory => Arc::new(MokaCacheBackend::new(config.max_capacity)),
            CacheBackendKind::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    AppError::Configuration(
                        "cache.redis_url is required for the redis backend".to_string(),
                    )
                })?;
                Arc::new(RedisCacheBackend::connect(url).await?)
            }
        };

        Ok(Some(EnrichmentCache::new(
            backend,
            CacheKeyCodec::new(&config.namespace),
            Duration::from_secs(config.ttl_secs),
        )))
    }

    pub fn registry(&self) -> &Arc<EnricherRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> Option<&Arc<EnrichmentCache>> {
        self.cache.as_ref()
    }

    /// Route a request to the best enricher for its type and tenant
    pub async fn enrich(&self, request: &EnrichmentRequest) -> EnrichmentResponse {
        if let Err(err) = request.check() {
            return EnrichmentResponse::failure(request, UNRESOLVED_PROVIDER, &err);
        }

        match self
            .registry
            .by_type_and_tenant(&request.type_key(), request.tenant_id)
        {
            Some(enricher) => enricher.enrich(request).await,
            None => {
                let err = AppError::NotFound(format!(
                    "No enricher found for type '{}' and tenant {}",
                    request.enrichment_type, request.tenant_id
                ));
                EnrichmentResponse::failure(request, UNRESOLVED_PROVIDER, &err)
            }
        }
    }

    /// Enrich through a named provider
    pub async fn enrich_with_provider(
        &self,
        provider_name: &str,
        request: &EnrichmentRequest,
    ) -> EnrichmentResponse {
        match self.registry.by_provider_name(provider_name) {
            Some(enricher) => enricher.enrich(request).await,
            None => {
                let err = AppError::NotFound(format!("No enricher named '{}'", provider_name));
                EnrichmentResponse::failure(request, provider_name, &err)
            }
        }
    }

    /// Lazily enrich a batch, responses in input order
    pub fn enrich_batch(
        &self,
        requests: Vec<EnrichmentRequest>,
    ) -> BoxStream<'static, Result<EnrichmentResponse>> {
        self.executor.execute(requests)
    }

    /// Enrich a batch and collect the responses
    pub async fn enrich_batch_all(
        &self,
        requests: Vec<EnrichmentRequest>,
    ) -> Result<Vec<EnrichmentResponse>> {
        self.executor.execute_all(requests).await
    }

    /// Evict cached responses in `scope`; a no-op when caching is disabled
    pub async fn evict(&self, scope: &EvictionScope) -> Result<u64> {
        match &self.cache {
            Some(cache) => cache.evict(scope).await,
            None => {
                debug!("Cache disabled, nothing to evict");
                Ok(0)
            }
        }
    }

    /// Descriptors visible for an optional tenant and type
    pub fn discover(
        &self,
        tenant_id: Option<Uuid>,
        enrichment_type: Option<&str>,
    ) -> Vec<EnricherDescriptor> {
        let enrichers = match (tenant_id, enrichment_type) {
            (Some(tenant_id), Some(t)) => self.registry.all_for_type_and_tenant(t, tenant_id),
            (Some(tenant_id), None) => self.registry.all_for_tenant(tenant_id),
            (None, Some(t)) => self.registry.all_for_type(t),
            (None, None) => self.registry.all().to_vec(),
        };

        enrichers.iter().map(|e| e.descriptor().clone()).collect()
    }

    /// Readiness of every enricher visible to the tenant (all when `None`)
    pub async fn health(&self, tenant_id: Option<Uuid>) -> Vec<ProviderHealth> {
        let enrichers = match tenant_id {
            Some(tenant_id) => self.registry.all_for_tenant(tenant_id),
            None => self.registry.all().to_vec(),
        };

        join_all(enrichers.iter().map(|enricher| async move {
            ProviderHealth {
                provider_name: enricher.provider_name().to_string(),
                tenant_id: enricher.tenant_id(),
                ready: enricher.is_ready().await,
            }
        }))
        .await
    }

    /// Get service statistics
    pub fn stats(&self) -> EnrichmentStats {
        let global_enrichers = self
            .registry
            .all()
            .iter()
            .filter(|e| e.descriptor().is_global())
            .count();

        EnrichmentStats {
            enricher_count: self.registry.len(),
            global_enrichers,
            tenant_enrichers: self.registry.len() - global_enrichers,
            cache_enabled: self.cache.is_some(),
            cache_backend: self.cache.as_ref().map(|c| c.backend_name().to_string()),
            cache_ttl_secs: self.cache.as_ref().map(|c| c.ttl().as_secs()),
            parallelism: self.executor.parallelism(),
            fail_fast: self.config.fail_fast,
        }
    }
}

/// Builds an [`EnrichmentService`] from [`Config`]
pub struct EnrichmentServiceBuilder<'a> {
    config: &'a Config,
    events: Option<Arc<dyn EnrichmentEventSink>>,
    resiliency: Option<Arc<dyn ResiliencyDecorator>>,
}

impl EnrichmentServiceBuilder<'_> {
    /// Sink for lifecycle events, tracing logs by default
    pub fn with_events(mut self, events: Arc<dyn EnrichmentEventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Decorator applied to every provider fetch, pass-through by default
    pub fn with_resiliency(mut self, resiliency: Arc<dyn ResiliencyDecorator>) -> Self {
        self.resiliency = Some(resiliency);
        self
    }

    pub async fn build(self) -> Result<EnrichmentService> {
        let config = self.config;
        config.validate()?;

        let events: Arc<dyn EnrichmentEventSink> = match self.events {
            Some(events) => events,
            None => Arc::new(TracingEventSink),
        };
        let resiliency: Arc<dyn ResiliencyDecorator> = match self.resiliency {
            Some(resiliency) => resiliency,
            None => Arc::new(PassThroughResiliency),
        };

        let cache = EnrichmentService::build_cache(&config.cache)
            .await?
            .map(Arc::new);

        let metrics: Arc<dyn EnrichmentMetricsSink> = if config.observability.prometheus_enabled {
            init_metrics()
                .map_err(|e| AppError::Internal(format!("Failed to register metrics: {}", e)))?;
            Arc::new(PrometheusMetricsSink)
        } else {
            Arc::new(NoopMetricsSink)
        };

        let mut enrichers: Vec<Arc<dyn Enricher>> = Vec::with_capacity(config.providers.len());
        for provider_config in &config.providers {
            let provider = HttpJsonProvider::new(provider_config.clone())?;
            let mut enricher = ProviderEnricher::new(provider.descriptor(), provider)
                .with_metrics(Arc::clone(&metrics))
                .with_events(Arc::clone(&events))
                .with_resiliency(Arc::clone(&resiliency))
                .with_config(config.enrichment.clone());
            if let Some(cache) = &cache {
                enricher = enricher.with_cache(Arc::clone(cache));
            }

            debug!(provider = %provider_config.name, "Registered HTTP provider");
            enrichers.push(Arc::new(enricher));
        }

        let registry = Arc::new(EnricherRegistry::new(enrichers)?);
        info!(
            enrichers = registry.len(),
            cache_enabled = cache.is_some(),
            "Enrichment service initialized"
        );

        Ok(EnrichmentService::new(registry, cache, config.enrichment.clone()))
    }
}
