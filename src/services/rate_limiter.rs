//! Fixed-window per-client request budget
//!
//! Counters are keyed by action, client and window index. A limiter that
//! cannot reach its store lets the request through.

use crate::error::{AppError, AppErrorKind, ExternalError};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
#[cfg(feature = "cache")]
use {crate::cache::keys::rate_limit::WindowKey, tracing::warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window: window.max(Duration::from_secs(1)),
        }
    }

    fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    fn window_index(&self, now_secs: u64) -> u64 {
        now_secs / self.window_secs()
    }

    fn decide(&self, count: u64, now_secs: u64) -> RateDecision {
        let limit = u64::from(self.limit);
        let window_end = (self.window_index(now_secs) + 1) * self.window_secs();
        RateDecision {
            allowed: count <= limit,
            limit: self.limit,
            remaining: limit.saturating_sub(count) as u32,
            retry_after_secs: if count <= limit {
                0
            } else {
                window_end.saturating_sub(now_secs).max(1)
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

impl RateDecision {
    #[cfg_attr(not(feature = "cache"), allow(dead_code))]
    fn open(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            retry_after_secs: 0,
        }
    }

    /// `Err` when the request must be refused.
    pub fn into_result(self, action: &str) -> Result<Self, AppError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                service: action.to_string(),
                retry_after: Some(self.retry_after_secs),
            })))
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request from `client` against `action`.
    async fn check(&self, action: &str, client: &str) -> RateDecision;
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Process-local counters; only the current window is kept.
pub struct InMemoryRateLimiter {
    policy: RateLimitPolicy,
    counters: Mutex<HashMap<String, (u64, u64)>>,
}

impl InMemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            counters: Mutex::new(HashMap::new()),
        }
    }

    async fn check_at(&self, action: &str, client: &str, now: u64) -> RateDecision {
        let window = self.policy.window_index(now);
        let key = format!("{}:{}", action, client);
        let mut counters = self.counters.lock().await;
        counters.retain(|_, (w, _)| *w == window);
        let entry = counters.entry(key).or_insert((window, 0));
        entry.1 += 1;
        self.policy.decide(entry.1, now)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, action: &str, client: &str) -> RateDecision {
        self.check_at(action, client, now_secs()).await
    }
}

/// Shared counters in Redis: `INCR` + `EXPIRE` in one atomic pipeline.
#[cfg(feature = "cache")]
pub struct RedisRateLimiter {
    pool: crate::cache::RedisPool,
    policy: RateLimitPolicy,
}

#[cfg(feature = "cache")]
impl RedisRateLimiter {
    pub fn new(pool: crate::cache::RedisPool, policy: RateLimitPolicy) -> Self {
        Self { pool, policy }
    }

    async fn increment(&self, key: &str) -> Result<u64, crate::cache::CacheError> {
        let mut conn = self.pool.get().await?;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, self.policy.window_secs() as i64)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(count)
    }
}

#[cfg(feature = "cache")]
#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(&self, action: &str, client: &str) -> RateDecision {
        let now = now_secs();
        let key = WindowKey::new(action, client, self.policy.window_index(now)).to_string();
        match self.increment(&key).await {
            Ok(count) => self.policy.decide(count, now),
            Err(e) => {
                warn!(action, client, error = %e, "rate limiter unavailable, allowing request");
                RateDecision::open(self.policy.limit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32) -> InMemoryRateLimiter {
        InMemoryRateLimiter::new(RateLimitPolicy::new(limit, Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn budget_is_per_client() {
        let limiter = limiter(2);
        let now = 600;

        assert!(limiter.check_at("smart_save", "a", now).await.allowed);
        let second = limiter.check_at("smart_save", "a", now).await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check_at("smart_save", "a", now + 10).await;
        assert!(!third.allowed);
        assert_eq!(third.retry_after_secs, 50);

        assert!(limiter.check_at("smart_save", "b", now).await.allowed);
    }

    #[tokio::test]
    async fn new_window_resets_budget() {
        let limiter = limiter(1);
        assert!(limiter.check_at("smart_save", "a", 600).await.allowed);
        assert!(!limiter.check_at("smart_save", "a", 659).await.allowed);
        assert!(limiter.check_at("smart_save", "a", 660).await.allowed);
    }

    #[tokio::test]
    async fn refusal_maps_to_rate_limited() {
        let limiter = limiter(0);
        let decision = limiter.check("smart_save", "a").await;
        let err = decision.into_result("smart_save").unwrap_err();
        assert_eq!(err.status_code(), 429);
        assert_eq!(err.error_code(), crate::error::ErrorCode::RateLimited);
    }
}
