//! Redis connection pool

use super::error::CacheError;
use crate::config::CacheConfig;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::Client;
use std::time::Duration;
use tracing::{error, info, warn};

/// Redis connection pool type alias
pub type RedisPool = Pool<RedisConnectionManager>;

/// Pool tuning
#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
    pub max_lifetime: Duration,
    pub idle_timeout: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 20,
            min_idle: 2,
            connection_timeout: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&CacheConfig> for RedisPoolConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            redis_url: config.redis_url.clone(),
            max_connections: config.max_connections,
            min_idle: config.max_connections.min(2),
            ..Default::default()
        }
    }
}

/// Initialize Redis connection pool
///
/// A failed PING at startup is logged but not fatal; every caller treats cache
/// errors as misses.
pub async fn init_cache_pool(config: RedisPoolConfig) -> Result<RedisPool, CacheError> {
    info!(
        max_connections = config.max_connections,
        "Initializing Redis cache pool"
    );

    let client = Client::open(config.redis_url.clone()).map_err(|e| {
        error!("Failed to create Redis client: {}", e);
        CacheError::ConnectionError(e.to_string())
    })?;

    let manager = RedisConnectionManager::new(client.get_connection_info().clone()).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        CacheError::ConnectionError(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(config.min_idle)
        .connection_timeout(config.connection_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .test_on_check_out(false)
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

    if let Err(e) = health_check(&pool).await {
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    info!("Redis cache pool initialized successfully");
    Ok(pool)
}

/// PING through the pool
pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool.get().await.map_err(|e| {
        error!("Failed to get Redis connection for test: {}", e);
        CacheError::ConnectionError(e.to_string())
    })?;

    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| {
            error!("Redis PING failed: {}", e);
            CacheError::ConnectionError(e.to_string())
        })?;

    Ok(())
}
