use super::{
    ENRICHMENT_COST_TOTAL, ENRICHMENT_DURATION_SECONDS, ENRICHMENT_ERRORS_TOTAL,
    ENRICHMENT_FIELDS_ENRICHED_TOTAL, ENRICHMENT_REQUESTS_TOTAL,
};

/// Receives enrichment measurements.
///
/// Calls are synchronous and must not fail or block the enrichment path.
pub trait EnrichmentMetricsSink: Send + Sync {
    fn record_enrichment(
        &self,
        enrichment_type: &str,
        provider: &str,
        success: bool,
        duration_ms: u64,
        fields_enriched: usize,
        cost: Option<f64>,
    );

    fn record_error(
        &self,
        enrichment_type: &str,
        provider: &str,
        error_kind: &str,
        duration_ms: u64,
    );
}

/// Sink backed by the global Prometheus metrics
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetricsSink;

impl EnrichmentMetricsSink for PrometheusMetricsSink {
    fn record_enrichment(
        &self,
        enrichment_type: &str,
        provider: &str,
        success: bool,
        duration_ms: u64,
        fields_enriched: usize,
        cost: Option<f64>,
    ) {
        let status = if success { "success" } else { "failure" };
        ENRICHMENT_REQUESTS_TOTAL
            .with_label_values(&[enrichment_type, provider, status])
            .inc();
        ENRICHMENT_DURATION_SECONDS
            .with_label_values(&[enrichment_type, provider])
            .observe(duration_ms as f64 / 1000.0);

        if fields_enriched > 0 {
            ENRICHMENT_FIELDS_ENRICHED_TOTAL
                .with_label_values(&[enrichment_type, provider])
                .inc_by(fields_enriched as u64);
        }

        if let Some(cost) = cost.filter(|c| c.is_finite() && *c > 0.0) {
            ENRICHMENT_COST_TOTAL.with_label_values(&[provider]).inc_by(cost);
        }
    }

    fn record_error(
        &self,
        enrichment_type: &str,
        provider: &str,
        error_kind: &str,
        duration_ms: u64,
    ) {
        ENRICHMENT_ERRORS_TOTAL
            .with_label_values(&[enrichment_type, provider, error_kind])
            .inc();
        ENRICHMENT_REQUESTS_TOTAL
            .with_label_values(&[enrichment_type, provider, "failure"])
            .inc();
        ENRICHMENT_DURATION_SECONDS
            .with_label_values(&[enrichment_type, provider])
            .observe(duration_ms as f64 / 1000.0);
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Default)]
pub struct NoopMetricsSink;

impl EnrichmentMetricsSink for NoopMetricsSink {
    fn record_enrichment(&self, _: &str, _: &str, _: bool, _: u64, _: usize, _: Option<f64>) {}

    fn record_error(&self, _: &str, _: &str, _: &str, _: u64) {}
}
