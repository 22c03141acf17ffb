//! Seam for wrapping provider calls with resiliency policies.
//!
//! The engine does not implement retries, breakers or limiters itself. It
//! hands every provider fetch to a [`ResiliencyDecorator`] as a re-invocable
//! [`ProviderOperation`] and awaits whatever comes back.

use crate::error::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// A re-invocable provider call
pub type ProviderOperation = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wraps a provider operation with resiliency behavior
pub trait ResiliencyDecorator: Send + Sync {
    /// Return an operation that applies this policy around `operation`.
    ///
    /// Decorating an already decorated operation must be harmless.
    fn decorate(&self, provider: &str, operation: ProviderOperation) -> ProviderOperation;
}

/// Leaves operations untouched
#[derive(Debug, Clone, Default)]
pub struct PassThroughResiliency;

impl ResiliencyDecorator for PassThroughResiliency {
    fn decorate(&self, _provider: &str, operation: ProviderOperation) -> ProviderOperation {
        operation
    }
}

/// Composes externally supplied layers in a fixed order.
///
/// From the caller inwards: retry, circuit breaker, rate limiter, bulkhead.
/// A retry therefore re-enters every other guard.
#[derive(Clone, Default)]
pub struct ResiliencyChain {
    retry: Option<Arc<dyn ResiliencyDecorator>>,
    circuit_breaker: Option<Arc<dyn ResiliencyDecorator>>,
    rate_limiter: Option<Arc<dyn ResiliencyDecorator>>,
    bulkhead: Option<Arc<dyn ResiliencyDecorator>>,
}

impl ResiliencyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, layer: Arc<dyn ResiliencyDecorator>) -> Self {
        self.retry = Some(layer);
        self
    }

    pub fn with_circuit_breaker(mut self, layer: Arc<dyn ResiliencyDecorator>) -> Self {
        self.circuit_breaker = Some(layer);
        self
    }

    pub fn with_rate_limiter(mut self, layer: Arc<dyn ResiliencyDecorator>) -> Self {
        self.rate_limiter = Some(layer);
        self
    }

    pub fn with_bulkhead(mut self, layer: Arc<dyn ResiliencyDecorator>) -> Self {
        self.bulkhead = Some(layer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.retry.is_none()
            && self.circuit_breaker.is_none()
            && self.rate_limiter.is_none()
            && self.bulkhead.is_none()
    }
}

impl ResiliencyDecorator for ResiliencyChain {
    fn decorate(&self, provider: &str, operation: ProviderOperation) -> ProviderOperation {
        // innermost first
        [
            &self.bulkhead,
            &self.rate_limiter,
            &self.circuit_breaker,
            &self.retry,
        ]
        .into_iter()
        .flatten()
        .fold(operation, |op, layer| layer.decorate(provider, op))
    }
}

impl std::fmt::Debug for ResiliencyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencyChain")
            .field("retry", &self.retry.is_some())
            .field("circuit_breaker", &self.circuit_breaker.is_some())
            .field("rate_limiter", &self.rate_limiter.is_some())
            .field("bulkhead", &self.bulkhead.is_some())
            .finish()
    }
}
