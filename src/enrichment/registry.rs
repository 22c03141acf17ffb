use crate::enrichment::enricher::Enricher;
use crate::enrichment::models::{EnricherDescriptor, GLOBAL_TENANT_ID};
use crate::error::{AppError, Result};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Immutable set of enrichers with priority-based resolution.
///
/// Resolution order for a (type, tenant) lookup: highest priority, then the
/// lexically smaller provider name (case-insensitive), then tenant-specific
/// over global.
pub struct EnricherRegistry {
    enrichers: Vec<Arc<dyn Enricher>>,
}

impl EnricherRegistry {
    /// Build a registry from the full set of enrichers.
    ///
    /// Rejects empty provider names, empty type lists and exact duplicates
    /// (same provider name and tenant with an overlapping type).
    pub fn new(enrichers: Vec<Arc<dyn Enricher>>) -> Result<Self> {
        for (index, enricher) in enrichers.iter().enumerate() {
            let descriptor = enricher.descriptor();
            Self::check_descriptor(descriptor)?;

            let mut name_seen = false;
            for other in enrichers[..index].iter().map(|e| e.descriptor()) {
                if !other.provider_name.eq_ignore_ascii_case(&descriptor.provider_name) {
                    continue;
                }
                name_seen = true;

                if other.tenant_id != descriptor.tenant_id {
                    continue;
                }
                if let Some(shared) = descriptor
                    .supported_types
                    .iter()
                    .find(|t| other.supports(t))
                {
                    return Err(AppError::Configuration(format!(
                        "duplicate enricher '{}' for type '{}' and tenant {}",
                        descriptor.provider_name, shared, descriptor.tenant_id
                    )));
                }
            }

            if name_seen {
                warn!(
                    provider = %descriptor.provider_name,
                    "Provider name registered more than once, name lookups return the first"
                );
            }
        }

        info!("Built enricher registry with {} enrichers", enrichers.len());
        Ok(Self { enrichers })
    }

    pub fn builder() -> EnricherRegistryBuilder {
        EnricherRegistryBuilder::default()
    }

    fn check_descriptor(descriptor: &EnricherDescriptor) -> Result<()> {
        if descriptor.provider_name.trim().is_empty() {
            return Err(AppError::Configuration(
                "enricher provider name must not be empty".to_string(),
            ));
        }

        if descriptor.supported_types.is_empty()
            || descriptor.supported_types.iter().any(|t| t.trim().is_empty())
        {
            return Err(AppError::Configuration(format!(
                "enricher '{}' must declare at least one non-empty type",
                descriptor.provider_name
            )));
        }

        Ok(())
    }

    /// Case-insensitive name lookup; the first registered wins
    pub fn by_provider_name(&self, name: &str) -> Option<Arc<dyn Enricher>> {
        self.enrichers
            .iter()
            .find(|e| e.provider_name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Highest-priority enricher for a type across all tenants
    pub fn by_type(&self, enrichment_type: &str) -> Option<Arc<dyn Enricher>> {
        self.select(|e| e.supports(enrichment_type))
    }

    /// Highest-priority enricher for a type, owned by the tenant or global
    pub fn by_type_and_tenant(
        &self,
        enrichment_type: &str,
        tenant_id: Uuid,
    ) -> Option<Arc<dyn Enricher>> {
        let selected = self.select(|e| {
            e.supports(enrichment_type) && Self::serves_tenant(e, tenant_id)
        });

        if let Some(enricher) = &selected {
            debug!(
                enrichment_type = %enrichment_type,
                tenant_id = %tenant_id,
                provider = %enricher.provider_name(),
                "Resolved enricher"
            );
        }
        selected
    }

    /// Enrichers owned by the tenant plus global ones
    pub fn all_for_tenant(&self, tenant_id: Uuid) -> Vec<Arc<dyn Enricher>> {
        self.filter(|e| Self::serves_tenant(e, tenant_id))
    }

    pub fn all_for_type(&self, enrichment_type: &str) -> Vec<Arc<dyn Enricher>> {
        self.filter(|e| e.supports(enrichment_type))
    }

    pub fn all_for_type_and_tenant(
        &self,
        enrichment_type: &str,
        tenant_id: Uuid,
    ) -> Vec<Arc<dyn Enricher>> {
        self.filter(|e| e.supports(enrichment_type) && Self::serves_tenant(e, tenant_id))
    }

    pub fn all(&self) -> &[Arc<dyn Enricher>] {
        &self.enrichers
    }

    pub fn descriptors(&self) -> Vec<EnricherDescriptor> {
        self.enrichers
            .iter()
            .map(|e| e.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.enrichers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrichers.is_empty()
    }

    fn serves_tenant(enricher: &dyn Enricher, tenant_id: Uuid) -> bool {
        let owner = enricher.tenant_id();
        owner == tenant_id || owner == GLOBAL_TENANT_ID
    }

    fn filter<F>(&self, predicate: F) -> Vec<Arc<dyn Enricher>>
    where
        F: Fn(&dyn Enricher) -> bool,
    {
        self.enrichers
            .iter()
            .filter(|e| predicate(e.as_ref()))
            .cloned()
            .collect()
    }

    fn select<F>(&self, predicate: F) -> Option<Arc<dyn Enricher>>
    where
        F: Fn(&dyn Enricher) -> bool,
    {
        self.enrichers
            .iter()
            .filter(|e| predicate(e.as_ref()))
            .min_by(|a, b| Self::rank(a.as_ref(), b.as_ref()))
            .cloned()
    }

    /// `Less` means `a` is preferred
    fn rank(a: &dyn Enricher, b: &dyn Enricher) -> Ordering {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| {
                a.provider_name()
                    .to_lowercase()
                    .cmp(&b.provider_name().to_lowercase())
            })
            .then_with(|| {
                let a_global = a.tenant_id() == GLOBAL_TENANT_ID;
                let b_global = b.tenant_id() == GLOBAL_TENANT_ID;
                a_global.cmp(&b_global)
            })
    }
}

impl std::fmt::Debug for EnricherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnricherRegistry")
            .field("enrichers", &self.descriptors())
            .finish()
    }
}

/// Collects enrichers before building an [`EnricherRegistry`]
#[derive(Default)]
pub struct EnricherRegistryBuilder {
    enrichers: Vec<Arc<dyn Enricher>>,
}

impl EnricherRegistryBuilder {
    pub fn register(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    pub fn register_all<I>(mut self, enrichers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Enricher>>,
    {
        self.enrichers.extend(enrichers);
        self
    }

    pub fn build(self) -> Result<EnricherRegistry> {
        EnricherRegistry::new(self.enrichers)
    }
}
