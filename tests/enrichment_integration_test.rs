mod common;

use common::{company_request, descriptor, enricher, MockProvider, COMPANY_PROFILE};
use enrichment_engine::enrichment::EnrichmentConfig;
use enrichment_engine::{
    AppError, BatchExecutor, Enricher, EnricherRegistry, EnrichmentCache, EnrichmentRequest,
    EnrichmentResponse, EnrichmentService, EnrichmentStrategy, EvictionScope, GLOBAL_TENANT_ID,
};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn shared_cache() -> Arc<EnrichmentCache> {
    Arc::new(EnrichmentCache::in_memory(10_000, Duration::from_secs(3600)))
}

fn registry_of(enrichers: Vec<Arc<dyn Enricher>>) -> Arc<EnricherRegistry> {
    Arc::new(EnricherRegistry::new(enrichers).unwrap())
}

/// Cache reads without an intervening write return the same result
#[tokio::test]
async fn test_cache_read_is_idempotent() {
    let cache = shared_cache();
    let request = company_request(Uuid::new_v4());

    assert!(cache.get(&request, "acme").await.is_none());
    assert!(cache.get(&request, "acme").await.is_none());

    let response = EnrichmentResponse::success(&request, "acme", json!({"name": "Acme Corp"}), 1);
    cache.put(&request, "acme", &response).await;

    let first = cache.get(&request, "acme").await.unwrap();
    let second = cache.get(&request, "acme").await.unwrap();
    assert_eq!(first.enriched_data, second.enriched_data);
    assert_eq!(first.fields_enriched, second.fields_enriched);
    assert_eq!(first.request_id, second.request_id);
}

/// ENHANCE keeps source values and fills the gaps
#[tokio::test]
async fn test_enhance_preserves_source() {
    let provider = Arc::new(MockProvider::acme());
    let enricher = enricher(descriptor("acme", GLOBAL_TENANT_ID, 10), provider, None);

    let response = enricher.enrich(&company_request(Uuid::new_v4())).await;

    assert!(response.success, "{:?}", response.error);
    let data = response.enriched_data.unwrap();
    assert_eq!(data["name"], "Acme Corp");
    assert_eq!(data["revenue"], 50_000_000.0);
    assert_eq!(data["employees"], 1200);
    assert_eq!(response.fields_enriched, 2);
}

/// MERGE lets non-null provider values win
#[tokio::test]
async fn test_merge_provider_wins() {
    let provider = Arc::new(MockProvider::acme());
    let enricher = enricher(descriptor("acme", GLOBAL_TENANT_ID, 10), provider, None);

    let request = company_request(Uuid::new_v4()).with_strategy(EnrichmentStrategy::Merge);
    let response = enricher.enrich(&request).await;

    assert!(response.success);
    let data = response.enriched_data.unwrap();
    assert_eq!(data["name"], "Other");
    assert_eq!(data["revenue"], 50_000_000.0);
}

/// REPLACE returns the mapped provider record and ignores the source
#[tokio::test]
async fn test_replace_ignores_source() {
    let provider = Arc::new(MockProvider::acme());
    let enricher = enricher(descriptor("acme", GLOBAL_TENANT_ID, 10), provider, None);

    let request = company_request(Uuid::new_v4())
        .with_strategy(EnrichmentStrategy::Replace)
        .with_source(json!({"name": "Acme Corp", "segment": "enterprise"}));
    let response = enricher.enrich(&request).await;

    assert_eq!(
        response.enriched_data.unwrap(),
        json!({"name": "Other", "revenue": 50_000_000.0, "employees": 1200})
    );
}

/// RAW returns the payload verbatim and never maps
#[tokio::test]
async fn test_raw_bypasses_mapping() {
    let provider = Arc::new(MockProvider::acme());
    let enricher = enricher(
        descriptor("acme", GLOBAL_TENANT_ID, 10),
        Arc::clone(&provider),
        None,
    );

    let request = company_request(Uuid::new_v4()).with_strategy(EnrichmentStrategy::Raw);
    let response = enricher.enrich(&request).await;

    assert!(response.success);
    assert_eq!(response.enriched_data.unwrap(), provider.payload);
    assert_eq!(provider.map_count(), 0);
    assert_eq!(provider.fetch_count(), 1);
}

/// Higher priority wins, equal priority falls back to provider name
#[tokio::test]
async fn test_registry_priority_tie_break() {
    let tenant = Uuid::new_v4();
    let provider = Arc::new(MockProvider::acme());

    let registry = registry_of(vec![
        Arc::new(enricher(descriptor("low", tenant, 50), Arc::clone(&provider), None)),
        Arc::new(enricher(descriptor("high", tenant, 100), Arc::clone(&provider), None)),
    ]);
    let chosen = registry.by_type_and_tenant(COMPANY_PROFILE, tenant).unwrap();
    assert_eq!(chosen.provider_name(), "high");

    let registry = registry_of(vec![
        Arc::new(enricher(descriptor("zeta", tenant, 100), Arc::clone(&provider), None)),
        Arc::new(enricher(descriptor("alpha", tenant, 100), Arc::clone(&provider), None)),
    ]);
    let chosen = registry.by_type_and_tenant(COMPANY_PROFILE, tenant).unwrap();
    assert_eq!(chosen.provider_name(), "alpha");
}

/// Entries written for one tenant are never visible to another
#[tokio::test]
async fn test_cache_tenant_isolation() {
    let cache = shared_cache();
    let provider = Arc::new(MockProvider::acme());
    let enricher = enricher(
        descriptor("acme", GLOBAL_TENANT_ID, 10),
        Arc::clone(&provider),
        Some(Arc::clone(&cache)),
    );

    let tenant_a = company_request(Uuid::new_v4());
    let mut tenant_b = tenant_a.clone();
    tenant_b.tenant_id = Uuid::new_v4();

    assert!(enricher.enrich(&tenant_a).await.success);
    assert!(cache.get(&tenant_a, "acme").await.is_some());
    assert!(cache.get(&tenant_b, "acme").await.is_none());

    let response = enricher.enrich(&tenant_b).await;
    assert!(!response.is_cache_hit());
    assert_eq!(provider.fetch_count(), 2);

    let evicted = cache
        .evict(&EvictionScope::Tenant(tenant_a.tenant_id))
        .await
        .unwrap();
    assert_eq!(evicted, 1);
    assert!(cache.get(&tenant_a, "acme").await.is_none());
    assert!(cache.get(&tenant_b, "acme").await.is_some());
}

/// An unresolvable item fails alone in continue-on-error mode
#[tokio::test]
async fn test_batch_failure_isolation() {
    let provider = Arc::new(MockProvider::acme());
    let registry = registry_of(vec![Arc::new(enricher(
        descriptor("acme", GLOBAL_TENANT_ID, 10),
        provider,
        None,
    ))]);
    let executor = BatchExecutor::new(registry);

    let tenant = Uuid::new_v4();
    let requests: Vec<EnrichmentRequest> = (1..=10)
        .map(|i| {
            if i == 5 {
                EnrichmentRequest::new("credit-score", tenant).with_request_id("req-5")
            } else {
                company_request(tenant).with_request_id(format!("req-{}", i))
            }
        })
        .collect();

    let responses = executor.execute_all(requests).await.unwrap();

    assert_eq!(responses.len(), 10);
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.request_id, format!("req-{}", i + 1));
        assert_eq!(response.success, i != 4, "item {}", i + 1);
    }
    assert!(responses[4]
        .error
        .as_deref()
        .unwrap()
        .contains("No enricher found"));
}

/// 1000 requests at parallelism 50 yield exactly 1000 responses
#[tokio::test]
async fn test_concurrent_batch_throughput() {
    let cache = shared_cache();
    let provider = Arc::new(MockProvider::acme().with_delay(Duration::from_millis(2)));
    let registry = registry_of(vec![Arc::new(enricher(
        descriptor("acme", GLOBAL_TENANT_ID, 10),
        Arc::clone(&provider),
        Some(Arc::clone(&cache)),
    ))]);
    let executor = BatchExecutor::new(registry).with_parallelism(50);

    let tenant = Uuid::new_v4();
    let requests: Vec<EnrichmentRequest> = (0..1000)
        .map(|i| {
            company_request(tenant)
                .with_parameter("companyId", format!("acme-{}", i % 20))
                .with_request_id(format!("req-{}", i))
        })
        .collect();

    let mut count = 0;
    let mut stream = executor.execute(requests);
    while let Some(item) = stream.next().await {
        let response = item.unwrap();
        assert!(response.success);
        assert_eq!(response.request_id, format!("req-{}", count));
        assert_eq!(response.enriched_data.as_ref().unwrap()["name"], "Acme Corp");
        count += 1;
    }

    assert_eq!(count, 1000);
    assert!(provider.fetch_count() >= 20);
    assert!(provider.fetch_count() <= 1000);

    for i in 0..20 {
        let request = company_request(tenant).with_parameter("companyId", format!("acme-{}", i));
        let cached = cache.get(&request, "acme").await.unwrap();
        assert!(cached.success);
        assert_eq!(cached.enriched_data.unwrap()["revenue"], 50_000_000.0);
    }
}

/// Fail-fast stops emitting after the first failure
#[tokio::test]
async fn test_batch_fail_fast() {
    let provider = Arc::new(MockProvider::acme());
    let registry = registry_of(vec![Arc::new(enricher(
        descriptor("acme", GLOBAL_TENANT_ID, 10),
        provider,
        None,
    ))]);
    let config = EnrichmentConfig {
        parallelism: 3,
        fail_fast: true,
        ..EnrichmentConfig::default()
    };
    let executor = BatchExecutor::from_config(registry, &config);

    let tenant = Uuid::new_v4();
    let requests: Vec<EnrichmentRequest> = (0..8)
        .map(|i| {
            let request = company_request(tenant);
            if i == 2 {
                request.with_parameter("fail", true)
            } else {
                request
            }
        })
        .collect();

    let items: Vec<_> = executor.execute(requests).collect().await;

    assert_eq!(items.len(), 3);
    assert!(items[0].is_ok() && items[1].is_ok());
    match &items[2] {
        Err(AppError::BatchAborted { index, message }) => {
            assert_eq!(*index, 2);
            assert!(message.contains("HTTP 500"));
        }
        other => panic!("expected abort, got {:?}", other.as_ref().map(|r| r.success)),
    }
}

/// A request timeout abandons the provider call without a partial merge
#[tokio::test]
async fn test_request_timeout() {
    let provider = Arc::new(MockProvider::acme().with_delay(Duration::from_millis(500)));
    let cache = shared_cache();
    let enricher = enricher(
        descriptor("acme", GLOBAL_TENANT_ID, 10),
        provider,
        Some(Arc::clone(&cache)),
    );

    let request = company_request(Uuid::new_v4()).with_timeout_millis(20);
    let response = enricher.enrich(&request).await;

    assert!(!response.success);
    assert_eq!(response.error_code.as_deref(), Some("TIMEOUT"));
    assert!(response.enriched_data.is_none());
    assert!(cache.get(&request, "acme").await.is_none());
}

/// Provider failures become failure responses and are not cached
#[tokio::test]
async fn test_provider_failure_is_contained() {
    let cache = shared_cache();
    let provider = Arc::new(MockProvider::acme().failing());
    let enricher = enricher(
        descriptor("acme", GLOBAL_TENANT_ID, 10),
        Arc::clone(&provider),
        Some(Arc::clone(&cache)),
    );

    let request = company_request(Uuid::new_v4());
    let first = enricher.enrich(&request).await;
    let second = enricher.enrich(&request).await;

    assert!(!first.success && !second.success);
    assert_eq!(first.error_code.as_deref(), Some("PROVIDER_ERROR"));
    assert_eq!(provider.fetch_count(), 2);
}

/// A tenant-owned enricher outranking the global one serves only its tenant
#[tokio::test]
async fn test_service_routes_by_tenant() {
    let tenant = Uuid::new_v4();
    let shared = Arc::new(MockProvider::acme());
    let private = Arc::new(MockProvider::new(json!({
        "company": {"legalName": "Private Co"},
        "financials": {"annualRevenue": 1.0},
        "employees": 3
    })));

    let registry = registry_of(vec![
        Arc::new(enricher(descriptor("alpha-shared", GLOBAL_TENANT_ID, 10), shared, None)),
        Arc::new(enricher(descriptor("zeta-private", tenant, 20), private, None)),
    ]);
    let service = EnrichmentService::new(registry, None, EnrichmentConfig::default());

    let own = service
        .enrich(&company_request(tenant).with_strategy(EnrichmentStrategy::Replace))
        .await;
    assert_eq!(own.provider_name, "zeta-private");
    assert_eq!(own.enriched_data.unwrap()["name"], "Private Co");

    let other = service
        .enrich(&company_request(Uuid::new_v4()).with_strategy(EnrichmentStrategy::Replace))
        .await;
    assert_eq!(other.provider_name, "alpha-shared");
    assert_eq!(other.enriched_data.unwrap()["name"], "Other");
}
