use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Enrichment lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EnrichmentEvent {
    /// Request accepted by an enricher
    Started {
        request_id: String,
        tenant_id: Uuid,
        enrichment_type: String,
        provider: String,
        strategy: String,
    },

    /// Enrichment finished successfully
    Completed {
        request_id: String,
        tenant_id: Uuid,
        enrichment_type: String,
        provider: String,
        fields_enriched: usize,
        duration_ms: u64,
        cache_hit: bool,
    },

    /// Enrichment failed
    Failed {
        request_id: String,
        tenant_id: Uuid,
        enrichment_type: String,
        provider: String,
        error: String,
        error_code: String,
        duration_ms: u64,
    },
}

impl EnrichmentEvent {
    /// Get the request ID from any event
    pub fn request_id(&self) -> &str {
        match self {
            EnrichmentEvent::Started { request_id, .. }
            | EnrichmentEvent::Completed { request_id, .. }
            | EnrichmentEvent::Failed { request_id, .. } => request_id,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            EnrichmentEvent::Started { .. } => "Started",
            EnrichmentEvent::Completed { .. } => "Completed",
            EnrichmentEvent::Failed { .. } => "Failed",
        }
    }
}

/// Event metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    pub event_id: String,

    /// Request id of the enrichment the event belongs to
    pub correlation_id: Option<String>,

    pub timestamp: DateTime<Utc>,

    /// Source service
    pub source: String,

    pub headers: HashMap<String, String>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            timestamp: Utc::now(),
            source: "enrichment-engine".to_string(),
            headers: HashMap::new(),
        }
    }
}

/// Envelope wrapping an event with metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub metadata: EventMetadata,
    pub payload: EnrichmentEvent,
}

impl EventEnvelope {
    /// Wrap an event, correlating it with its request id
    pub fn new(payload: EnrichmentEvent) -> Self {
        let metadata = EventMetadata {
            correlation_id: Some(payload.request_id().to_string()),
            ..EventMetadata::default()
        };
        Self { metadata, payload }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.headers.insert(key.into(), value.into());
        self
    }
}
