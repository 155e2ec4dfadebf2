use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::BastionError;

/// Cache backend trait for pluggable caching strategies.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a raw value from the cache.
    async fn get(&self, key: &str) -> Result<Option<String>, BastionError>;

    /// Set a raw value in the cache with optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>)
    -> Result<(), BastionError>;

    /// Delete a key from the cache.
    async fn del(&self, key: &str) -> Result<bool, BastionError>;

    /// Delete every key starting with `prefix`, returning how many were removed.
    async fn del_prefix(&self, prefix: &str) -> Result<usize, BastionError>;

    /// Flush all keys (use with caution).
    async fn flush(&self) -> Result<(), BastionError>;
}

/// The process-wide cache used by the catalogs.
///
/// Catalog reads go through [`CacheNamespace::get_or_load`]; every catalog
/// mutation calls [`CacheNamespace::invalidate`], which drops the whole
/// namespace instead of tracking individual keys. Readers may therefore see
/// data up to one TTL old.
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
}

impl CacheService {
    /// Create a new cache service with the given backend.
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        CacheService {
            backend: Arc::new(backend),
        }
    }

    /// Create an in-memory cache (good for single-process deployments and tests).
    pub fn in_memory() -> Self {
        CacheService::new(InMemoryCache::new())
    }

    /// Get a JSON-deserialized value from the cache.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BastionError> {
        match self.backend.get(key).await? {
            Some(raw) => {
                let value: T = serde_json::from_str(&raw).map_err(|e| {
                    BastionError::Internal(format!("Cache deserialize error: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a JSON-serialized value in the cache.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), BastionError> {
        let raw = serde_json::to_string(value)
            .map_err(|e| BastionError::Internal(format!("Cache serialize error: {}", e)))?;
        self.backend.set(key, &raw, ttl).await
    }

    /// Get a raw string from the cache.
    pub async fn get(&self, key: &str) -> Result<Option<String>, BastionError> {
        self.backend.get(key).await
    }

    /// Set a raw string in the cache.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BastionError> {
        self.backend.set(key, value, ttl).await
    }

    /// Delete a key from the cache.
    pub async fn del(&self, key: &str) -> Result<bool, BastionError> {
        self.backend.del(key).await
    }

    /// Delete all keys matching a prefix.
    pub async fn del_prefix(&self, prefix: &str) -> Result<usize, BastionError> {
        self.backend.del_prefix(prefix).await
    }

    /// Flush the entire cache.
    pub async fn flush(&self) -> Result<(), BastionError> {
        self.backend.flush().await
    }

    /// A view of this cache restricted to keys under `name:`.
    pub fn namespace(&self, name: &str, ttl: Duration) -> CacheNamespace {
        CacheNamespace {
            cache: self.clone(),
            prefix: format!("{name}:"),
            ttl,
        }
    }
}

/// A key prefix plus TTL over a shared [`CacheService`].
#[derive(Clone)]
pub struct CacheNamespace {
    cache: CacheService,
    prefix: String,
    ttl: Duration,
}

impl CacheNamespace {
    pub fn key(&self, shape: &str) -> String {
        format!("{}{}", self.prefix, shape)
    }

    /// Read-through: return the cached value for `shape`, or run `load`, store
    /// its output and return it.
    ///
    /// Cache faults never fail the read; they are logged and the loader runs.
    pub async fn get_or_load<T, F, Fut>(&self, shape: &str, load: F) -> Result<T, BastionError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BastionError>>,
    {
        let key = self.key(shape);
        match self.cache.get_json::<T>(&key).await {
            Ok(Some(hit)) => return Ok(hit),
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "cache read failed, loading from store"),
        }

        let value = load().await?;
        if let Err(e) = self.cache.set_json(&key, &value, Some(self.ttl)).await {
            tracing::warn!(key = %key, error = %e, "cache write failed");
        }
        Ok(value)
    }

    /// Drop every entry in the namespace.
    pub async fn invalidate(&self) {
        match self.cache.del_prefix(&self.prefix).await {
            Ok(removed) => tracing::debug!(namespace = %self.prefix, removed, "cache namespace invalidated"),
            Err(e) => tracing::warn!(namespace = %self.prefix, error = %e, "cache invalidation failed"),
        }
    }
}

// ── In-Memory Cache Backend ──

/// In-memory cache holding `key -> (value, expiry)`.
#[derive(Clone)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        InMemoryCache {
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, BastionError> {
        let store = self.store.read().await;
        match store.get(key) {
            Some(entry) => {
                if let Some(expires_at) = entry.expires_at {
                    if Instant::now() > expires_at {
                        drop(store);
                        self.store.write().await.remove(key);
                        return Ok(None);
                    }
                }
                Ok(Some(entry.value.clone()))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BastionError> {
        let now = Instant::now();
        let expires_at = ttl.map(|d| now + d);
        let mut store = self.store.write().await;
        store.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
        store.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, BastionError> {
        Ok(self.store.write().await.remove(key).is_some())
    }

    async fn del_prefix(&self, prefix: &str) -> Result<usize, BastionError> {
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|key, _| !key.starts_with(prefix));
        Ok(before - store.len())
    }

    async fn flush(&self) -> Result<(), BastionError> {
        self.store.write().await.clear();
        Ok(())
    }
}

// ── Redis Cache Backend ──

/// Redis-backed cache for multi-process deployments.
///
/// ```rust,ignore
/// let cache = RedisCache::new("redis://127.0.0.1:6379").await?;
/// let service = CacheService::new(cache);
/// ```
#[cfg(feature = "redis")]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

#[cfg(feature = "redis")]
impl RedisCache {
    /// Create a new Redis cache from a connection URL.
    pub async fn new(url: &str) -> Result<Self, BastionError> {
        let client = redis::Client::open(url)
            .map_err(|e| BastionError::Internal(format!("Redis connection error: {}", e)))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| BastionError::Internal(format!("Redis connection error: {}", e)))?;
        Ok(RedisCache { conn })
    }
}

#[cfg(feature = "redis")]
#[async_trait::async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, BastionError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| BastionError::Internal(format!("Redis GET error: {}", e)))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), BastionError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| BastionError::Internal(format!("Redis SETEX error: {}", e))),
            None => conn
                .set(key, value)
                .await
                .map_err(|e| BastionError::Internal(format!("Redis SET error: {}", e))),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, BastionError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let count: i64 = conn
            .del(key)
            .await
            .map_err(|e| BastionError::Internal(format!("Redis DEL error: {}", e)))?;
        Ok(count > 0)
    }

    async fn del_prefix(&self, prefix: &str) -> Result<usize, BastionError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.clone();
        let keys: Vec<String> = {
            let mut iter: redis::AsyncIter<String> = conn
                .scan_match(format!("{prefix}*"))
                .await
                .map_err(|e| BastionError::Internal(format!("Redis SCAN error: {}", e)))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: i64 = conn
            .del(&keys)
            .await
            .map_err(|e| BastionError::Internal(format!("Redis DEL error: {}", e)))?;
        Ok(removed as usize)
    }

    async fn flush(&self) -> Result<(), BastionError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| BastionError::Internal(format!("Redis FLUSHDB error: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_del_prefix_only_touches_namespace() {
        let cache = CacheService::in_memory();
        cache.set("resources:list", "a", None).await.unwrap();
        cache.set("resources:stats", "b", None).await.unwrap();
        cache.set("permissions:list", "c", None).await.unwrap();

        let removed = cache.del_prefix("resources:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("resources:list").await.unwrap().is_none());
        assert_eq!(cache.get("permissions:list").await.unwrap(), Some("c".to_string()));
    }

    #[tokio::test]
    async fn test_get_or_load_caches_until_invalidated() {
        let cache = CacheService::in_memory();
        let ns = cache.namespace("resources", Duration::from_secs(60));
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..3 {
            let value: Vec<u32> = ns
                .get_or_load("list", || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        ns.invalidate().await;
        let _: Vec<u32> = ns
            .get_or_load("list", || async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(vec![4])
            })
            .await
            .unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted() {
        let cache = CacheService::in_memory();
        cache
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_sweeps_expired_entries() {
        let backend = InMemoryCache::new();
        for i in 0..5 {
            backend
                .set(&format!("stale:{i}"), "v", Some(Duration::from_millis(10)))
                .await
                .unwrap();
        }
        backend.set("kept", "v", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        backend.set("fresh", "v", Some(Duration::from_secs(60))).await.unwrap();
        let keys: Vec<String> = backend.store.read().await.keys().cloned().collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"kept".to_string()));
        assert!(keys.contains(&"fresh".to_string()));
    }
}
