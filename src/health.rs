//! Health check module
//! Provides health status for the application and its dependencies

use crate::services::RateProvider;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: BTreeMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    fn from_checks(checks: BTreeMap<String, ComponentHealth>) -> Self {
        let status = if checks.values().any(|c| c.status == ComponentState::Down) {
            HealthState::Unhealthy
        } else if checks.values().any(|c| c.status == ComponentState::Warning) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Degraded still serves traffic: stale FX rates are acceptable.
    pub fn is_ready(&self) -> bool {
        self.status != HealthState::Unhealthy
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

async fn timed<F, E>(name: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    match timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(())) => {
            let elapsed = start.elapsed().as_millis();
            info!(component = name, response_time_ms = elapsed as u64, "health check ok");
            ComponentHealth::up(Some(elapsed))
        }
        Ok(Err(e)) => {
            error!(component = name, error = %e, "health check failed");
            ComponentHealth::down(Some(e.to_string()))
        }
        Err(_) => {
            error!(component = name, "health check timed out");
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

/// Health checker for the application. Components that were not wired
/// (local development without Postgres/Redis) are simply not reported.
#[derive(Clone, Default)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    #[cfg(feature = "cache")]
    redis: Option<crate::cache::RedisPool>,
    rates: Option<Arc<dyn RateProvider>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, pool: crate::cache::RedisPool) -> Self {
        self.redis = Some(pool);
        self
    }

    pub fn with_rate_provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.rates = Some(provider);
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut checks = BTreeMap::new();

        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            checks.insert(
                "database".to_string(),
                timed("database", crate::database::health_check(pool)).await,
            );
        }

        #[cfg(feature = "cache")]
        if let Some(pool) = &self.redis {
            checks.insert(
                "cache".to_string(),
                timed("cache", crate::cache::health_check(pool)).await,
            );
        }

        // FX outages degrade SmartSave only; bookings keep working
        if let Some(provider) = &self.rates {
            let health = if provider.is_healthy().await {
                ComponentHealth::up(None)
            } else {
                warn!(provider = provider.name(), "rate provider unhealthy");
                ComponentHealth::warning(None, Some(format!("{} unavailable", provider.name())))
            };
            checks.insert("fx_rates".to_string(), health);
        }

        HealthStatus::from_checks(checks)
    }
}

/// GET /health
pub async fn health(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let status = checker.check_health().await;
    let code = if status.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// GET /health/ready
pub async fn readiness(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let status = checker.check_health().await;
    if status.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "checks": status.checks })),
        )
    }
}

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

pub fn router(checker: HealthChecker) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(checker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::FixedRateProvider;

    #[tokio::test]
    async fn nothing_wired_is_healthy() {
        let status = HealthChecker::new().check_health().await;
        assert_eq!(status.status, HealthState::Healthy);
        assert!(status.checks.is_empty());
    }

    #[tokio::test]
    async fn fixed_rates_report_up() {
        let status = HealthChecker::new()
            .with_rate_provider(Arc::new(FixedRateProvider::new()))
            .check_health()
            .await;
        assert_eq!(status.checks["fx_rates"].status, ComponentState::Up);
        assert!(status.is_ready());
    }

    #[test]
    fn warning_degrades_and_down_fails() {
        let mut checks = BTreeMap::new();
        checks.insert("fx_rates".to_string(), ComponentHealth::warning(None, None));
        let degraded = HealthStatus::from_checks(checks.clone());
        assert_eq!(degraded.status, HealthState::Degraded);
        assert!(degraded.is_ready());

        checks.insert("database".to_string(), ComponentHealth::down(None));
        let down = HealthStatus::from_checks(checks);
        assert_eq!(down.status, HealthState::Unhealthy);
        assert!(!down.is_ready());
    }
}
