//! Caching layer
//!
//! - `Cache<T>`: get / set with TTL / delete, injected into every component
//!   that caches (supplier tokens, FX rate snapshots, SmartSave results)
//! - `InMemoryCache` for the process-local layer, `RedisCache` for the
//!   persisted layer, `LayeredCache` to stack them
//! - Gracefully degrades when Redis is unavailable: cache errors become misses

#[allow(clippy::module_inception)]
pub mod cache;
pub mod error;
pub mod keys;
#[cfg(feature = "cache")]
pub mod pool;

pub use self::cache::{Cache, InMemoryCache, LayeredCache};
#[cfg(feature = "cache")]
pub use self::cache::RedisCache;
pub use self::error::{CacheError, CacheResult};
#[cfg(feature = "cache")]
pub use self::pool::{health_check, init_cache_pool, RedisPool, RedisPoolConfig};
