use anyhow::Context;
use axum::Router;
use serde::{de::DeserializeOwned, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};
use wayfare_backend::api::{self, AppState};
use wayfare_backend::cache::{init_cache_pool, Cache, InMemoryCache, LayeredCache, RedisCache, RedisPoolConfig};
use wayfare_backend::config::AppConfig;
use wayfare_backend::database::{
    init_pool_from_config, run_migrations, BookingRepository, InMemoryBookingRepository,
    PgBookingRepository,
};
use wayfare_backend::health::{self, HealthChecker};
use wayfare_backend::logging::init_tracing;
use wayfare_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use wayfare_backend::payments::providers::stripe::{StripeCheckoutProvider, StripeConfig};
use wayfare_backend::payments::CheckoutProvider;
use wayfare_backend::services::{
    BookingStore, CheckoutSessionOrchestrator, CheckoutSettings, ConfirmationReconciler,
    FixedRateProvider, FxSmartSaveEngine, HttpRateProvider, InMemoryRateLimiter,
    PrebookingValidator, ProvisionalBookingManager, RateCache, RateLimitPolicy, RateLimiter,
    RateProvider, RedisRateLimiter, SmartSaveSettings,
};
use wayfare_backend::supplier::{
    ClientCredentialsSource, HttpSupplierApi, RetryPolicy, SupplierClient, SupplierTokenProvider,
};
use wayfare_backend::workers::{PendingReconcilerConfig, PendingReconcilerWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// Local layer in front of Redis when Redis is wired, local only otherwise.
fn layered_cache<T>(local_ttl: Duration, redis: Option<&RedisCache>) -> Arc<dyn Cache<T>>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match redis {
        Some(redis) => {
            let persistent: Arc<dyn Cache<T>> = Arc::new(redis.clone());
            Arc::new(LayeredCache::new(local_ttl).with_persistent(persistent))
        }
        None => Arc::new(InMemoryCache::new(local_ttl)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        settlement_currency = %config.checkout.settlement_currency,
        "Starting wayfare backend"
    );

    // Persistence
    let mut health_checker = HealthChecker::new();
    let repository: Arc<dyn BookingRepository> = match &config.database {
        Some(db_config) => {
            info!("Initializing database connection pool");
            let pool = init_pool_from_config(db_config).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            run_migrations(&pool).await?;
            info!(
                max_connections = pool.options().get_max_connections(),
                "Database ready"
            );
            health_checker = health_checker.with_database(pool.clone());
            Arc::new(PgBookingRepository::new(pool))
        }
        None => {
            warn!("No database configured, bookings are kept in memory");
            Arc::new(InMemoryBookingRepository::new())
        }
    };

    // Cache
    let redis = match &config.cache {
        Some(cache_config) => {
            info!("Initializing Redis cache connection pool");
            let pool = init_cache_pool(RedisPoolConfig::from(cache_config))
                .await
                .map_err(|e| {
                    error!("Failed to initialize cache pool: {}", e);
                    e
                })?;
            health_checker = health_checker.with_cache(pool.clone());
            Some(pool)
        }
        None => {
            warn!("No Redis configured, caches and rate limits are process-local");
            None
        }
    };
    let redis_cache = redis.clone().map(|pool| {
        RedisCache::new(pool).with_default_ttl(Duration::from_secs(
            config.cache.as_ref().map(|c| c.default_ttl).unwrap_or(3600),
        ))
    });

    // Supplier
    let supplier_api = Arc::new(HttpSupplierApi::new(&config.supplier)?);
    let token_source = Arc::new(ClientCredentialsSource::new(
        supplier_api.http_client().clone(),
        &config.supplier,
    ));
    let tokens = Arc::new(SupplierTokenProvider::new(
        token_source,
        layered_cache(Duration::from_secs(3600), redis_cache.as_ref()),
        &config.supplier.client_id,
        chrono::Duration::seconds(config.supplier.token_safety_margin_secs as i64),
    ));
    let retry = RetryPolicy::new(
        config.supplier.max_attempts,
        Duration::from_millis(config.supplier.base_delay_ms),
    )
    .with_multiplier(config.supplier.backoff_multiplier)
    .with_max_delay(Duration::from_millis(config.supplier.max_delay_ms));
    let supplier = Arc::new(SupplierClient::new(
        supplier_api,
        tokens,
        retry,
        config.checkout.settlement_currency.clone(),
    ));
    info!(base_url = %config.supplier.base_url, "Supplier client initialized");

    // Checkout and booking pipeline
    let provider: Arc<dyn CheckoutProvider> = Arc::new(
        StripeCheckoutProvider::new(StripeConfig::from(&config.checkout))
            .context("failed to initialize checkout provider")?,
    );
    let store = BookingStore::new(repository.clone());
    let reconciler = Arc::new(ConfirmationReconciler::new(store.clone(), provider.clone()));
    let checkout = Arc::new(CheckoutSessionOrchestrator::new(
        store.clone(),
        provider,
        CheckoutSettings::from(&config.checkout),
    ));
    let bookings = Arc::new(ProvisionalBookingManager::new(
        store,
        config.checkout.settlement_currency.clone(),
    ));

    // FX SmartSave
    let smart_save_config = &config.smart_save;
    let live_rates_url = smart_save_config
        .rates_api_url
        .as_ref()
        .filter(|_| !config.skip_externals);
    let rate_provider: Arc<dyn RateProvider> = match live_rates_url {
        Some(url) => {
            info!(url = %url, "Using HTTP FX rate provider");
            Arc::new(HttpRateProvider::new(
                url.clone(),
                smart_save_config.rates_api_key.clone(),
            ))
        }
        None => {
            warn!("No live FX source configured, using the fixed rate table");
            Arc::new(FixedRateProvider::new())
        }
    };
    health_checker = health_checker.with_rate_provider(rate_provider.clone());

    let rate_ttl = Duration::from_secs(smart_save_config.rate_ttl_secs);
    let rates = Arc::new(RateCache::new(
        layered_cache(rate_ttl, redis_cache.as_ref()),
        rate_provider,
        rate_ttl,
    ));
    let policy = RateLimitPolicy::new(
        smart_save_config.rate_limit_requests,
        Duration::from_secs(smart_save_config.rate_limit_window_secs),
    );
    let limiter: Arc<dyn RateLimiter> = match redis {
        Some(pool) => Arc::new(RedisRateLimiter::new(pool, policy)),
        None => Arc::new(InMemoryRateLimiter::new(policy)),
    };
    let settings = SmartSaveSettings::from(smart_save_config);
    let smart_save = Arc::new(FxSmartSaveEngine::new(
        rates,
        layered_cache(settings.result_ttl, redis_cache.as_ref()),
        limiter,
        settings,
    ));

    let state = AppState {
        validator: Arc::new(PrebookingValidator::new(supplier.clone())),
        supplier,
        bookings,
        checkout,
        reconciler: reconciler.clone(),
        smart_save,
    };

    // Background reconciliation
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = PendingReconcilerWorker::new(
        repository,
        reconciler,
        PendingReconcilerConfig::from_env(),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let app: Router = api::router(state)
        .merge(health::router(health_checker))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(axum::middleware::from_fn(request_logging_middleware)),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid SERVER_HOST/SERVER_PORT")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx))
        .await?;

    if let Err(e) = worker_handle.await {
        error!(error = %e, "reconciler task ended abnormally");
    }
    info!("Server shut down");
    Ok(())
}
