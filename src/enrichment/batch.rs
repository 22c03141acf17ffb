use crate::enrichment::enricher::Enricher;
use crate::enrichment::models::{
    EnrichmentConfig, EnrichmentRequest, EnrichmentResponse, DEFAULT_BATCH_PARALLELISM,
};
use crate::enrichment::registry::EnricherRegistry;
use crate::error::{AppError, Result};
use crate::metrics::{BATCH_IN_FLIGHT, BATCH_REQUESTS_TOTAL};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Provider name reported on responses for requests no enricher resolved
pub const UNRESOLVED_PROVIDER: &str = "unresolved";

/// Runs batches of requests with bounded parallelism.
///
/// Requests are grouped by (type, tenant) and each group is resolved once
/// through [`EnricherRegistry::by_type_and_tenant`]. In continue-on-error
/// mode every request yields a response; in fail-fast mode the stream ends
/// with [`AppError::BatchAborted`] at the first failed item.
///
/// Items of every group share one stream bounded by the executor's
/// parallelism instead of going through [`Enricher::enrich_batch`], which
/// only returns once its whole group is done. Responses are emitted as soon
/// as they and every earlier item are ready.
#[derive(Clone)]
pub struct BatchExecutor {
    registry: Arc<EnricherRegistry>,
    parallelism: usize,
    fail_fast: bool,
}

struct PlannedItem {
    request: EnrichmentRequest,
    enricher: Option<Arc<dyn Enricher>>,
}

/// Keeps the in-flight gauge accurate when a future is dropped mid-call
struct InFlightGuard;

impl InFlightGuard {
    fn enter() -> Self {
        BATCH_IN_FLIGHT.inc();
        InFlightGuard
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        BATCH_IN_FLIGHT.dec();
    }
}

impl BatchExecutor {
    pub fn new(registry: Arc<EnricherRegistry>) -> Self {
        Self {
            registry,
            parallelism: DEFAULT_BATCH_PARALLELISM,
            fail_fast: false,
        }
    }

    pub fn from_config(registry: Arc<EnricherRegistry>, config: &EnrichmentConfig) -> Self {
        Self::new(registry)
            .with_parallelism(config.parallelism)
            .with_fail_fast(config.fail_fast)
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Resolve one enricher per (type, tenant) group
    fn plan(&self, requests: Vec<EnrichmentRequest>) -> Vec<PlannedItem> {
        let mut groups: HashMap<(String, Uuid), Option<Arc<dyn Enricher>>> = HashMap::new();

        let planned: Vec<PlannedItem> = requests
            .into_iter()
            .map(|request| {
                let group = (request.type_key(), request.tenant_id);
                let enricher = groups
                    .entry(group)
                    .or_insert_with_key(|(enrichment_type, tenant_id)| {
                        let resolved =
                            self.registry.by_type_and_tenant(enrichment_type, *tenant_id);
                        if resolved.is_none() {
                            warn!(
                                enrichment_type = %enrichment_type,
                                tenant_id = %tenant_id,
                                "No enricher resolved for batch group"
                            );
                        }
                        resolved
                    })
                    .clone();
                PlannedItem { request, enricher }
            })
            .collect();

        let mode = if self.fail_fast { "fail_fast" } else { "continue_on_error" };
        BATCH_REQUESTS_TOTAL
            .with_label_values(&[mode])
            .inc_by(planned.len() as u64);
        info!(
            requests = planned.len(),
            groups = groups.len(),
            parallelism = self.parallelism,
            mode,
            "Executing enrichment batch"
        );

        planned
    }

    async fn run_item(item: PlannedItem) -> EnrichmentResponse {
        let _guard = InFlightGuard::enter();
        match item.enricher {
            Some(enricher) => enricher.enrich(&item.request).await,
            None => {
                let err = AppError::NotFound(format!(
                    "No enricher found for type '{}' and tenant {}",
                    item.request.enrichment_type, item.request.tenant_id
                ));
                EnrichmentResponse::failure(&item.request, UNRESOLVED_PROVIDER, &err)
            }
        }
    }

    fn aborted(index: usize, response: &EnrichmentResponse) -> AppError {
        AppError::BatchAborted {
            index,
            message: response
                .error
                .clone()
                .unwrap_or_else(|| "enrichment failed".to_string()),
        }
    }

    /// Lazily enrich `requests`, yielding responses in input order
    pub fn execute(
        &self,
        requests: Vec<EnrichmentRequest>,
    ) -> BoxStream<'static, Result<EnrichmentResponse>> {
        let responses = stream::iter(self.plan(requests))
            .map(Self::run_item)
            .buffered(self.parallelism);

        if !self.fail_fast {
            return responses.map(Ok).boxed();
        }

        responses
            .enumerate()
            .scan(false, |aborted, (index, response)| {
                if *aborted {
                    return future::ready(None);
                }
                if response.success {
                    return future::ready(Some(Ok(response)));
                }
                *aborted = true;
                future::ready(Some(Err(Self::aborted(index, &response))))
            })
            .boxed()
    }

    /// Lazily enrich `requests`, yielding `(input index, response)` in
    /// completion order
    pub fn execute_unordered(
        &self,
        requests: Vec<EnrichmentRequest>,
    ) -> BoxStream<'static, Result<(usize, EnrichmentResponse)>> {
        let responses = stream::iter(self.plan(requests).into_iter().enumerate())
            .map(|(index, item)| async move { (index, Self::run_item(item).await) })
            .buffer_unordered(self.parallelism);

        if !self.fail_fast {
            return responses.map(Ok).boxed();
        }

        responses
            .scan(false, |aborted, (index, response)| {
                if *aborted {
                    return future::ready(None);
                }
                if response.success {
                    return future::ready(Some(Ok((index, response))));
                }
                *aborted = true;
                future::ready(Some(Err(Self::aborted(index, &response))))
            })
            .boxed()
    }

    /// Enrich `requests` and collect the responses in input order
    pub async fn execute_all(
        &self,
        requests: Vec<EnrichmentRequest>,
    ) -> Result<Vec<EnrichmentResponse>> {
        self.execute(requests).try_collect().await
    }
}
