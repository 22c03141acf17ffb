//! Common test utilities for enrichment integration tests
//!
//! Provides a scriptable provider with call counters, enricher builders and
//! a parser for the Prometheus exposition format.

#![allow(dead_code)]

use async_trait::async_trait;
use enrichment_engine::enrichment::{FieldKind, ProviderCost};
use enrichment_engine::events::NoopEventSink;
use enrichment_engine::metrics::NoopMetricsSink;
use enrichment_engine::{
    AppError, DataProvider, EnricherDescriptor, EnrichmentCache, EnrichmentRequest,
    ProviderEnricher, Result, TargetShape,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const COMPANY_PROFILE: &str = "company-profile";

/// Provider returning a fixed payload and counting fetch and map calls
pub struct MockProvider {
    pub payload: Value,
    pub delay: Duration,
    pub fail: bool,
    pub fetches: AtomicUsize,
    pub mappings: AtomicUsize,
}

impl MockProvider {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            delay: Duration::ZERO,
            fail: false,
            fetches: AtomicUsize::new(0),
            mappings: AtomicUsize::new(0),
        }
    }

    /// Provider answering with the Acme company record
    pub fn acme() -> Self {
        Self::new(json!({
            "company": {"legalName": "Other"},
            "financials": {"annualRevenue": 50_000_000.0},
            "employees": 1200
        }))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn map_count(&self) -> usize {
        self.mappings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for MockProvider {
    async fn fetch(&self, request: &EnrichmentRequest) -> Result<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail || request.parameters.get("fail") == Some(&json!(true)) {
            return Err(AppError::provider("mock", "HTTP 500"));
        }
        Ok(self.payload.clone())
    }

    fn map_to_target(&self, payload: &Value) -> Result<Value> {
        self.mappings.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "name": payload["company"]["legalName"],
            "revenue": payload["financials"]["annualRevenue"],
            "employees": payload["employees"],
        }))
    }

    fn target_shape(&self) -> TargetShape {
        TargetShape::declared([
            ("name", FieldKind::String),
            ("revenue", FieldKind::Number),
            ("employees", FieldKind::Number),
        ])
    }

    fn cost(&self, _request: &EnrichmentRequest, _payload: &Value) -> Option<ProviderCost> {
        Some(ProviderCost::new(0.01, "USD"))
    }
}

pub fn descriptor(name: &str, tenant_id: Uuid, priority: i32) -> EnricherDescriptor {
    EnricherDescriptor::new(name, vec![COMPANY_PROFILE.to_string()])
        .for_tenant(tenant_id)
        .with_priority(priority)
}

/// Enricher around a shared provider so tests can inspect its counters
pub fn enricher(
    descriptor: EnricherDescriptor,
    provider: Arc<MockProvider>,
    cache: Option<Arc<EnrichmentCache>>,
) -> ProviderEnricher<MockProvider> {
    let enricher = ProviderEnricher::from_arc(descriptor, provider)
        .with_metrics(Arc::new(NoopMetricsSink))
        .with_events(Arc::new(NoopEventSink));

    match cache {
        Some(cache) => enricher.with_cache(cache),
        None => enricher,
    }
}

pub fn company_request(tenant_id: Uuid) -> EnrichmentRequest {
    EnrichmentRequest::new(COMPANY_PROFILE, tenant_id)
        .with_parameter("companyId", "acme-1")
        .with_source(json!({"name": "Acme Corp", "revenue": null}))
}

/// Helper function to parse Prometheus exposition format
/// Returns a map of metric lines for easy assertion
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                current_metric = parts[2].to_string();
                metrics
                    .entry(current_metric.clone())
                    .or_insert_with(Vec::new)
                    .push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics
                .entry(current_metric.clone())
                .or_insert_with(Vec::new)
                .push(line.to_string());
        }
    }

    metrics
}
