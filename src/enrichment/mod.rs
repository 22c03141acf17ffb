/// Data enrichment engine
///
/// This module provides:
/// - Strategy-based field reconciliation (ENHANCE, MERGE, REPLACE, RAW)
/// - Priority-based enricher resolution per type and tenant
/// - Tenant-isolated response caching
/// - Provider orchestration with resiliency, metrics and lifecycle events
/// - Bounded-parallelism batch execution

pub mod batch;
pub mod cache;
pub mod enricher;
pub mod models;
pub mod registry;
pub mod service;
pub mod strategy;

pub use batch::BatchExecutor;
pub use cache::{
    CacheBackend, CacheEntry, CacheKeyCodec, EnrichmentCache, EvictionScope, MokaCacheBackend,
    RedisCacheBackend,
};
pub use enricher::{DataProvider, Enricher, ProviderEnricher};
pub use models::{
    EnricherDescriptor, EnrichmentConfig, EnrichmentRequest, EnrichmentResponse,
    EnrichmentStrategy, ProviderCost, GLOBAL_TENANT_ID,
};
pub use registry::{EnricherRegistry, EnricherRegistryBuilder};
pub use service::{
    EnrichmentService, EnrichmentServiceBuilder, EnrichmentStats, ProviderHealth,
};
pub use strategy::{FieldKind, FieldRecord, MergeOutcome, StrategyMerger, TargetShape};
