//! Enrichment lifecycle events and their sinks

mod envelope;
mod publisher;

pub use envelope::{EnrichmentEvent, EventEnvelope, EventMetadata};
pub use publisher::{ChannelEventPublisher, EnrichmentEventSink, NoopEventSink, TracingEventSink};
