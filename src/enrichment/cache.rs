use crate::enrichment::models::{EnrichmentRequest, EnrichmentResponse};
use crate::error::{AppError, Result};
use crate::metrics::CACHE_OPERATIONS_TOTAL;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use redis::aio::ConnectionManager;
use redis::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default cache namespace (first key segment)
pub const DEFAULT_NAMESPACE: &str = "enrichment";

/// Default time-to-live of a cached response
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Key/value store used by [`EnrichmentCache`]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Delete every key starting with `prefix`, returning the number deleted
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct StoredBytes {
    bytes: Arc<Vec<u8>>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, StoredBytes> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredBytes,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredBytes,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process backend using Moka
#[derive(Clone)]
pub struct MokaCacheBackend {
    cache: Cache<String, StoredBytes>,
}

impl MokaCacheBackend {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl CacheBackend for MokaCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .cache
            .get(key)
            .await
            .map(|stored| stored.bytes.as_ref().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.cache
            .insert(
                key.to_string(),
                StoredBytes {
                    bytes: Arc::new(value),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let keys: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key)
            .collect();

        let mut deleted = 0;
        for key in keys {
            if self.cache.remove(key.as_str()).await.is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Redis backend
#[derive(Clone)]
pub struct RedisCacheBackend {
    connection: ConnectionManager,
}

impl RedisCacheBackend {
    /// Connect to Redis and verify the connection
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            AppError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Cache(format!("Failed to connect to Redis: {}", e)))?;

        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await
            .map_err(|e| AppError::Cache(format!("Redis connection test failed: {}", e)))?;

        info!("Initialized Redis cache backend");

        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut deleted = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(deleted)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Eviction scope. Every scope is bounded by a single tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionScope {
    Tenant(Uuid),
    TenantProvider {
        tenant_id: Uuid,
        provider: String,
    },
    TenantProviderType {
        tenant_id: Uuid,
        provider: String,
        enrichment_type: String,
    },
}

impl EvictionScope {
    pub fn tenant_id(&self) -> Uuid {
        match self {
            EvictionScope::Tenant(tenant_id)
            | EvictionScope::TenantProvider { tenant_id, .. }
            | EvictionScope::TenantProviderType { tenant_id, .. } => *tenant_id,
        }
    }
}

/// Derives tenant-namespaced cache keys.
///
/// Layout: `{namespace}:{tenant}:{provider}:{type}:{sha256}`. The digest
/// covers the unescaped provider name, type, tenant, parameters, strategy
/// and source record in canonical (key-sorted) JSON form, so providers whose
/// names escape to the same segment still get distinct keys.
#[derive(Debug, Clone)]
pub struct CacheKeyCodec {
    namespace: String,
}

impl Default for CacheKeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl CacheKeyCodec {
    pub fn new(namespace: impl AsRef<str>) -> Self {
        Self {
            namespace: segment(namespace.as_ref()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Full cache key for a request served by `provider`
    pub fn key(&self, request: &EnrichmentRequest, provider: &str) -> Result<String> {
        Ok(format!(
            "{}:{}:{}:{}:{}",
            self.namespace,
            request.tenant_id,
            segment(provider),
            segment(&request.enrichment_type),
            Self::digest(request, provider)?
        ))
    }

    /// Key prefix matching every entry in `scope`
    pub fn prefix(&self, scope: &EvictionScope) -> String {
        match scope {
            EvictionScope::Tenant(tenant_id) => format!("{}:{}:", self.namespace, tenant_id),
            EvictionScope::TenantProvider {
                tenant_id,
                provider,
            } => format!("{}:{}:{}:", self.namespace, tenant_id, segment(provider)),
            EvictionScope::TenantProviderType {
                tenant_id,
                provider,
                enrichment_type,
            } => format!(
                "{}:{}:{}:{}:",
                self.namespace,
                tenant_id,
                segment(provider),
                segment(enrichment_type)
            ),
        }
    }

    /// SHA-256 hex digest of the canonical request content for `provider`
    pub fn digest(request: &EnrichmentRequest, provider: &str) -> Result<String> {
        let content = json!({
            "provider": provider,
            "type": request.type_key(),
            "tenant_id": request.tenant_id,
            "parameters": Value::Object(request.parameters.clone()),
            "strategy": request.strategy,
            "source_record": request.source_record,
        });
        let bytes = serde_json::to_vec(&canonicalize(content))?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}

fn segment(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ':' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Rebuild objects with keys in sorted order, recursively
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Stored cache record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: EnrichmentResponse,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Tenant-isolated response cache.
///
/// Backend failures never surface: reads degrade to a miss and writes are
/// skipped, both with a warning.
#[derive(Clone)]
pub struct EnrichmentCache {
    backend: Arc<dyn CacheBackend>,
    codec: CacheKeyCodec,
    ttl: Duration,
}

impl EnrichmentCache {
    pub fn new(backend: Arc<dyn CacheBackend>, codec: CacheKeyCodec, ttl: Duration) -> Self {
        Self {
            backend,
            codec,
            ttl,
        }
    }

    /// In-process cache with the default namespace
    pub fn in_memory(max_capacity: u64, ttl: Duration) -> Self {
        Self::new(
            Arc::new(MokaCacheBackend::new(max_capacity)),
            CacheKeyCodec::default(),
            ttl,
        )
    }

    pub fn codec(&self) -> &CacheKeyCodec {
        &self.codec
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Look up a cached response. Misses on absence, expiry or backend error.
    pub async fn get(
        &self,
        request: &EnrichmentRequest,
        provider: &str,
    ) -> Option<EnrichmentResponse> {
        let key = match self.codec.key(request, provider) {
            Ok(key) => key,
            Err(e) => {
                warn!(request_id = %request.request_id, "Failed to derive cache key: {}", e);
                record("get", "error");
                return None;
            }
        };

        let bytes = match self.backend.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                record("get", "miss");
                return None;
            }
            Err(e) => {
                warn!(
                    backend = self.backend.name(),
                    key = %key,
                    "Cache read failed, treating as miss: {}",
                    e
                );
                record("get", "error");
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.key != key => {
                warn!(key = %key, "Cache entry key mismatch, ignoring entry");
                record("get", "error");
                None
            }
            Ok(entry) if entry.is_expired() => {
                debug!(key = %key, "Cache entry expired");
                record("get", "expired");
                None
            }
            Ok(entry) => {
                debug!(key = %key, "Cache hit");
                record("get", "hit");
                Some(entry.value)
            }
            Err(e) => {
                warn!(key = %key, "Corrupt cache entry, treating as miss: {}", e);
                record("get", "error");
                None
            }
        }
    }

    /// Store a successful response. Failed responses are never cached.
    pub async fn put(
        &self,
        request: &EnrichmentRequest,
        provider: &str,
        response: &EnrichmentResponse,
    ) {
        if !response.success {
            debug!(request_id = %request.request_id, "Skipping cache write for failed response");
            record("put", "skipped");
            return;
        }

        let key = match self.codec.key(request, provider) {
            Ok(key) => key,
            Err(e) => {
                warn!(request_id = %request.request_id, "Failed to derive cache key: {}", e);
                record("put", "error");
                return;
            }
        };

        let ttl =
            chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let entry = CacheEntry {
            key: key.clone(),
            value: response.clone(),
            expires_at: Utc::now() + ttl,
        };

        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, "Failed to serialize cache entry: {}", e);
                record("put", "error");
                return;
            }
        };

        match self.backend.put(&key, bytes, self.ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl_secs = self.ttl.as_secs(), "Cached enrichment response");
                record("put", "ok");
            }
            Err(e) => {
                warn!(
                    backend = self.backend.name(),
                    key = %key,
                    "Cache write failed, skipping: {}",
                    e
                );
                record("put", "error");
            }
        }
    }

    /// Evict every entry in `scope`, returning the number of entries removed
    pub async fn evict(&self, scope: &EvictionScope) -> Result<u64> {
        let prefix = self.codec.prefix(scope);
        let deleted = self
            .backend
            .delete_by_prefix(&prefix)
            .await
            .inspect_err(|_| record("evict", "error"))?;

        info!(
            tenant_id = %scope.tenant_id(),
            prefix = %prefix,
            deleted,
            "Evicted cache entries"
        );
        record("evict", "ok");
        Ok(deleted)
    }
}

fn record(operation: &str, result: &str) {
    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::models::EnrichmentStrategy;
    use serde_json::json;

    fn request(tenant: Uuid) -> EnrichmentRequest {
        EnrichmentRequest::new("company-profile", tenant)
            .with_parameter("companyId", "acme")
            .with_parameter("country", "US")
    }

    fn cache() -> EnrichmentCache {
        EnrichmentCache::in_memory(1_000, DEFAULT_TTL)
    }

    struct FailingBackend;

    #[async_trait]
    impl CacheBackend for FailingBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(AppError::Cache("connection refused".to_string()))
        }

        async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
            Err(AppError::Cache("connection refused".to_string()))
        }

        async fn delete_by_prefix(&self, _prefix: &str) -> Result<u64> {
            Err(AppError::Cache("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_key_layout() {
        let tenant = Uuid::new_v4();
        let codec = CacheKeyCodec::default();
        let key = codec.key(&request(tenant), "Acme Data").unwrap();

        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "enrichment");
        assert_eq!(parts[1], tenant.to_string());
        assert_eq!(parts[2], "acme_data");
        assert_eq!(parts[3], "company-profile");
        assert_eq!(parts[4].len(), 64);
    }

    #[test]
    fn test_providers_with_same_segment_get_distinct_keys() {
        let codec = CacheKeyCodec::default();
        let req = request(Uuid::new_v4());

        let spaced = codec.key(&req, "acme data").unwrap();
        let underscored = codec.key(&req, "acme_data").unwrap();

        assert_eq!(
            spaced.rsplit_once(':').unwrap().0,
            underscored.rsplit_once(':').unwrap().0
        );
        assert_ne!(spaced, underscored);
    }

    #[test]
    fn test_digest_is_parameter_order_independent() {
        let tenant = Uuid::new_v4();
        let a = EnrichmentRequest::new("company-profile", tenant)
            .with_parameter("a", 1)
            .with_parameter("b", json!({"y": 2, "x": 1}));
        let b = EnrichmentRequest::new("company-profile", tenant)
            .with_parameter("b", json!({"x": 1, "y": 2}))
            .with_parameter("a", 1);

        assert_eq!(
            CacheKeyCodec::digest(&a, "acme").unwrap(),
            CacheKeyCodec::digest(&b, "acme").unwrap()
        );
    }

    #[test]
    fn test_digest_ignores_request_id_but_not_strategy() {
        let tenant = Uuid::new_v4();
        let a = request(tenant);
        let b = request(tenant).with_request_id("another");
        let c = request(tenant).with_strategy(EnrichmentStrategy::Merge);

        assert_eq!(
            CacheKeyCodec::digest(&a, "acme").unwrap(),
            CacheKeyCodec::digest(&b, "acme").unwrap()
        );
        assert_ne!(
            CacheKeyCodec::digest(&a, "acme").unwrap(),
            CacheKeyCodec::digest(&c, "acme").unwrap()
        );
    }

    #[test]
    fn test_scope_prefixes() {
        let tenant = Uuid::new_v4();
        let codec = CacheKeyCodec::default();
        let key = codec.key(&request(tenant), "acme").unwrap();

        let scopes = [
            EvictionScope::Tenant(tenant),
            EvictionScope::TenantProvider {
                tenant_id: tenant,
                provider: "ACME".to_string(),
            },
            EvictionScope::TenantProviderType {
                tenant_id: tenant,
                provider: "acme".to_string(),
                enrichment_type: "Company-Profile".to_string(),
            },
        ];
        for scope in &scopes {
            assert!(key.starts_with(&codec.prefix(scope)), "{:?}", scope);
        }

        let other = EvictionScope::Tenant(Uuid::new_v4());
        assert!(!key.starts_with(&codec.prefix(&other)));
    }

    #[tokio::test]
    async fn test_cache_read_is_idempotent() {
        let cache = cache();
        let req = request(Uuid::new_v4());
        let response = EnrichmentResponse::success(&req, "acme", json!({"name": "Acme"}), 1);

        cache.put(&req, "acme", &response).await;

        let first = cache.get(&req, "acme").await;
        let second = cache.get(&req, "acme").await;
        assert!(first.is_some());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let cache = cache();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let req_a = request(tenant_a);
        let response = EnrichmentResponse::success(&req_a, "acme", json!({"name": "Acme"}), 1);

        cache.put(&req_a, "acme", &response).await;

        assert!(cache.get(&req_a, "acme").await.is_some());
        assert!(cache.get(&request(tenant_b), "acme").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_responses_are_not_cached() {
        let cache = cache();
        let req = request(Uuid::new_v4());
        let response =
            EnrichmentResponse::failure(&req, "acme", &AppError::provider("acme", "HTTP 500"));

        cache.put(&req, "acme", &response).await;

        assert!(cache.get(&req, "acme").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let backend = Arc::new(MokaCacheBackend::new(100));
        let codec = CacheKeyCodec::default();
        let req = request(Uuid::new_v4());
        let key = codec.key(&req, "acme").unwrap();

        let entry = CacheEntry {
            key: key.clone(),
            value: EnrichmentResponse::success(&req, "acme", json!({}), 0),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        };
        backend
            .put(&key, serde_json::to_vec(&entry).unwrap(), DEFAULT_TTL)
            .await
            .unwrap();

        let cache = EnrichmentCache::new(backend, codec, DEFAULT_TTL);
        assert!(cache.get(&req, "acme").await.is_none());
    }

    #[tokio::test]
    async fn test_backend_errors_degrade() {
        let cache = EnrichmentCache::new(
            Arc::new(FailingBackend),
            CacheKeyCodec::default(),
            DEFAULT_TTL,
        );
        let req = request(Uuid::new_v4());
        let response = EnrichmentResponse::success(&req, "acme", json!({}), 0);

        cache.put(&req, "acme", &response).await;
        assert!(cache.get(&req, "acme").await.is_none());
        assert!(cache.evict(&EvictionScope::Tenant(req.tenant_id)).await.is_err());
    }

    #[tokio::test]
    async fn test_evict_by_scope() {
        let cache = cache();
        let tenant = Uuid::new_v4();
        let other_tenant = Uuid::new_v4();

        let entries = [(tenant, "acme"), (tenant, "globex"), (other_tenant, "acme")];
        for (tenant_id, provider) in entries {
            let req = request(tenant_id);
            let response = EnrichmentResponse::success(&req, provider, json!({}), 0);
            cache.put(&req, provider, &response).await;
        }

        let deleted = cache
            .evict(&EvictionScope::TenantProvider {
                tenant_id: tenant,
                provider: "acme".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(cache.get(&request(tenant), "acme").await.is_none());
        assert!(cache.get(&request(tenant), "globex").await.is_some());

        let deleted = cache.evict(&EvictionScope::Tenant(tenant)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(cache.get(&request(other_tenant), "acme").await.is_some());
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
