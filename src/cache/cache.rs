//! Cache abstraction and its backends
//!
//! Components receive a `Cache<T>` and never assume an entry survives between
//! calls: every cache here is best-effort, and a miss only costs a fetch.

use super::error::{CacheError, CacheResult};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[async_trait]
pub trait Cache<T>: Send + Sync
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;

    /// `ttl = None` uses the backend default.
    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;
}

/// JSON values in Redis, one key per entry.
#[cfg(feature = "cache")]
#[derive(Clone)]
pub struct RedisCache {
    pool: super::RedisPool,
    default_ttl: Duration,
}

#[cfg(feature = "cache")]
impl RedisCache {
    pub fn new(pool: super::RedisPool) -> Self {
        Self {
            pool,
            default_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn pool(&self) -> &super::RedisPool {
        &self.pool
    }
}

#[cfg(feature = "cache")]
#[async_trait]
impl<T> Cache<T> for RedisCache
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        use redis::AsyncCommands;

        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        use redis::AsyncCommands;

        let payload = serde_json::to_string(value)?;
        let seconds = ttl.unwrap_or(self.default_ttl).as_secs().max(1);
        let mut conn = self.pool.get().await?;
        let _: () = conn.set_ex(key, payload, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        use redis::AsyncCommands;

        let mut conn = self.pool.get().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

/// Process-local cache with per-entry TTL.
pub struct InMemoryCache<T> {
    entries: RwLock<HashMap<String, Entry<T>>>,
    default_ttl: Duration,
}

impl<T> InMemoryCache<T> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.write().await.retain(|_, e| e.expires_at > now);
    }
}

impl<T> Default for InMemoryCache<T> {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl<T> Cache<T> for InMemoryCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(CacheError::OperationError(format!(
                "zero TTL for key {}",
                key
            )));
        }
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

/// Process-local layer in front of an optional persistent layer.
///
/// Reads go local first, then persistent (backfilling local). Writes go to
/// both. Persistent-layer failures are logged and treated as misses so the
/// caller falls through to its source of truth.
pub struct LayeredCache<T> {
    local: InMemoryCache<T>,
    persistent: Option<Arc<dyn Cache<T>>>,
    local_ttl: Duration,
}

impl<T> LayeredCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(local_ttl: Duration) -> Self {
        Self {
            local: InMemoryCache::new(local_ttl),
            persistent: None,
            local_ttl,
        }
    }

    pub fn with_persistent(mut self, persistent: Arc<dyn Cache<T>>) -> Self {
        self.persistent = Some(persistent);
        self
    }

    pub fn local(&self) -> &InMemoryCache<T> {
        &self.local
    }
}

#[async_trait]
impl<T> Cache<T> for LayeredCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        if let Some(value) = self.local.get(key).await? {
            debug!(key, "local cache hit");
            return Ok(Some(value));
        }

        let Some(persistent) = &self.persistent else {
            return Ok(None);
        };

        match persistent.get(key).await {
            Ok(Some(value)) => {
                debug!(key, "persistent cache hit");
                self.local.set(key, &value, Some(self.local_ttl)).await?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(key, error = %e, "persistent cache read failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let local_ttl = ttl.map(|t| t.min(self.local_ttl)).unwrap_or(self.local_ttl);
        self.local.set(key, value, Some(local_ttl)).await?;

        if let Some(persistent) = &self.persistent {
            if let Err(e) = persistent.set(key, value, ttl).await {
                warn!(key, error = %e, "persistent cache write failed");
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut removed = self.local.delete(key).await?;
        if let Some(persistent) = &self.persistent {
            match persistent.delete(key).await {
                Ok(r) => removed |= r,
                Err(e) => warn!(key, error = %e, "persistent cache delete failed"),
            }
        }
        Ok(removed)
    }
}
