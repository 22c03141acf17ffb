use super::envelope::{EnrichmentEvent, EventEnvelope};
use crate::enrichment::models::{EnrichmentRequest, EnrichmentResponse};
use crate::error::AppError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receives lifecycle events. Publishing never blocks and never fails.
pub trait EnrichmentEventSink: Send + Sync {
    fn publish(&self, event: EnrichmentEvent);

    fn publish_started(&self, request: &EnrichmentRequest, provider: &str) {
        self.publish(EnrichmentEvent::Started {
            request_id: request.request_id.clone(),
            tenant_id: request.tenant_id,
            enrichment_type: request.enrichment_type.clone(),
            provider: provider.to_string(),
            strategy: request.strategy.to_string(),
        });
    }

    fn publish_completed(&self, request: &EnrichmentRequest, response: &EnrichmentResponse) {
        self.publish(EnrichmentEvent::Completed {
            request_id: request.request_id.clone(),
            tenant_id: request.tenant_id,
            enrichment_type: request.enrichment_type.clone(),
            provider: response.provider_name.clone(),
            fields_enriched: response.fields_enriched,
            duration_ms: response.duration_ms,
            cache_hit: response.is_cache_hit(),
        });
    }

    fn publish_failed(
        &self,
        request: &EnrichmentRequest,
        provider: &str,
        error: &AppError,
        duration_ms: u64,
    ) {
        self.publish(EnrichmentEvent::Failed {
            request_id: request.request_id.clone(),
            tenant_id: request.tenant_id,
            enrichment_type: request.enrichment_type.clone(),
            provider: provider.to_string(),
            error: error.to_string(),
            error_code: error.error_code().to_string(),
            duration_ms,
        });
    }
}

/// Publishes envelopes onto a bounded channel with `try_send`.
///
/// Events are dropped when the channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<EventEnvelope>,
    source: String,
}

impl ChannelEventPublisher {
    /// Create a publisher and the receiving end of its channel
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                sender,
                source: "enrichment-engine".to_string(),
            },
            receiver,
        )
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl EnrichmentEventSink for ChannelEventPublisher {
    fn publish(&self, event: EnrichmentEvent) {
        let envelope = EventEnvelope::new(event).with_source(self.source.clone());
        match self.sender.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                warn!(
                    request_id = %envelope.payload.request_id(),
                    event = envelope.payload.event_type(),
                    "Event channel full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                debug!(
                    request_id = %envelope.payload.request_id(),
                    event = envelope.payload.event_type(),
                    "Event channel closed, dropping event"
                );
            }
        }
    }
}

/// Writes events to the log
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl EnrichmentEventSink for TracingEventSink {
    fn publish(&self, event: EnrichmentEvent) {
        match &event {
            EnrichmentEvent::Failed {
                request_id,
                provider,
                error,
                ..
            } => {
                info!(
                    request_id = %request_id,
                    provider = %provider,
                    error = %error,
                    "Enrichment failed"
                );
            }
            _ => {
                debug!(
                    request_id = %event.request_id(),
                    event = event.event_type(),
                    "Enrichment event"
                );
            }
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Default)]
pub struct NoopEventSink;

impl EnrichmentEventSink for NoopEventSink {
    fn publish(&self, _event: EnrichmentEvent) {}
}
