//! Multi-tenant data enrichment engine.
//!
//! Merges caller-supplied records with third-party provider data according
//! to a declared strategy, routes each (type, tenant) request to the
//! highest-priority enricher, caches results per tenant and runs batches
//! with bounded parallelism.

pub mod config;
pub mod enrichment;
pub mod error;
pub mod events;
pub mod metrics;
pub mod providers;
pub mod resiliency;

pub use config::Config;
pub use enrichment::{
    BatchExecutor, DataProvider, Enricher, EnricherDescriptor, EnricherRegistry, EnrichmentCache,
    EnrichmentRequest, EnrichmentResponse, EnrichmentService, EnrichmentStrategy, EvictionScope,
    ProviderEnricher, StrategyMerger, TargetShape, GLOBAL_TENANT_ID,
};
pub use error::{AppError, Result};
