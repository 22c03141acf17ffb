//! Prometheus metrics for the enrichment engine.
//!
//! All metrics live in a process-wide registry under the
//! `enrichment_engine` namespace. Call [`init_metrics`] once at startup and
//! expose [`gather_metrics`] wherever the text format is scraped.
//!
//! ```no_run
//! use enrichment_engine::metrics::ENRICHMENT_REQUESTS_TOTAL;
//!
//! ENRICHMENT_REQUESTS_TOTAL
//!     .with_label_values(&["company-profile", "acme", "success"])
//!     .inc();
//! ```

mod sink;

pub use sink::{EnrichmentMetricsSink, NoopMetricsSink, PrometheusMetricsSink};

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

const NAMESPACE: &str = "enrichment_engine";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Total number of enrichment requests
    ///
    /// Labels: type, provider, status
    pub static ref ENRICHMENT_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("requests_total", "Total number of enrichment requests")
            .namespace(NAMESPACE),
        &["type", "provider", "status"]
    ).expect("Failed to create ENRICHMENT_REQUESTS_TOTAL metric");

    /// Enrichment duration in seconds
    ///
    /// Labels: type, provider
    pub static ref ENRICHMENT_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "duration_seconds",
            "Enrichment duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["type", "provider"]
    ).expect("Failed to create ENRICHMENT_DURATION_SECONDS metric");

    /// Fields contributed by providers
    ///
    /// Labels: type, provider
    pub static ref ENRICHMENT_FIELDS_ENRICHED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fields_enriched_total", "Total number of fields contributed by providers")
            .namespace(NAMESPACE),
        &["type", "provider"]
    ).expect("Failed to create ENRICHMENT_FIELDS_ENRICHED_TOTAL metric");

    /// Accumulated provider cost
    ///
    /// Labels: provider
    pub static ref ENRICHMENT_COST_TOTAL: CounterVec = CounterVec::new(
        Opts::new("cost_total", "Accumulated provider cost")
            .namespace(NAMESPACE),
        &["provider"]
    ).expect("Failed to create ENRICHMENT_COST_TOTAL metric");

    /// Enrichment errors
    ///
    /// Labels: type, provider, error_kind
    pub static ref ENRICHMENT_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("errors_total", "Total number of enrichment errors")
            .namespace(NAMESPACE),
        &["type", "provider", "error_kind"]
    ).expect("Failed to create ENRICHMENT_ERRORS_TOTAL metric");

    /// Cache operations
    ///
    /// Labels: operation (get, put, evict), result
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_operations_total", "Total number of cache operations")
            .namespace(NAMESPACE),
        &["operation", "result"]
    ).expect("Failed to create CACHE_OPERATIONS_TOTAL metric");

    /// Batch requests submitted
    ///
    /// Labels: mode (continue_on_error, fail_fast)
    pub static ref BATCH_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("batch_requests_total", "Total number of requests submitted through batches")
            .namespace(NAMESPACE),
        &["mode"]
    ).expect("Failed to create BATCH_REQUESTS_TOTAL metric");

    /// Batch items currently being enriched
    pub static ref BATCH_IN_FLIGHT: IntGauge = IntGauge::with_opts(
        Opts::new("batch_in_flight", "Number of batch items currently in flight")
            .namespace(NAMESPACE)
    ).expect("Failed to create BATCH_IN_FLIGHT metric");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; already registered collectors are skipped.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ENRICHMENT_REQUESTS_TOTAL.clone()),
        Box::new(ENRICHMENT_DURATION_SECONDS.clone()),
        Box::new(ENRICHMENT_FIELDS_ENRICHED_TOTAL.clone()),
        Box::new(ENRICHMENT_COST_TOTAL.clone()),
        Box::new(ENRICHMENT_ERRORS_TOTAL.clone()),
        Box::new(CACHE_OPERATIONS_TOTAL.clone()),
        Box::new(BATCH_REQUESTS_TOTAL.clone()),
        Box::new(BATCH_IN_FLIGHT.clone()),
    ];

    for collector in collectors {
        match PROMETHEUS_REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
