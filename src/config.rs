//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use bigdecimal::BigDecimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// `None` when `SKIP_EXTERNALS=true`
    pub database: Option<DatabaseConfig>,
    /// `None` when `SKIP_EXTERNALS=true`
    pub cache: Option<CacheConfig>,
    pub logging: LoggingConfig,
    pub supplier: SupplierConfig,
    pub checkout: CheckoutConfig,
    pub smart_save: SmartSaveConfig,
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub default_ttl: u64, // seconds
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Travel supplier API (search, reprice, OAuth client credentials)
#[derive(Debug, Clone)]
pub struct SupplierConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Tokens are treated as expired this many seconds before the supplier says so
    pub token_safety_margin_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
}

/// Hosted checkout provider
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub api_base_url: String,
    pub secret_key: String,
    pub webhook_secret: String,
    /// The only currency the platform charges in
    pub settlement_currency: String,
    pub session_ttl_secs: u64,
    pub success_url: String,
    pub cancel_url: String,
    pub webhook_tolerance_secs: i64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

/// FX-SmartSave engine
#[derive(Debug, Clone)]
pub struct SmartSaveConfig {
    /// Conversion fee in percent, applied to every option including USD
    pub fee_percent: BigDecimal,
    /// Savings at or below this amount are not shown
    pub min_savings_usd: BigDecimal,
    pub result_ttl_secs: u64,
    pub rate_ttl_secs: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub rates_api_url: Option<String>,
    pub rates_api_key: Option<String>,
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(name.to_string()))
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env::var("SKIP_EXTERNALS")
            .unwrap_or_else(|_| "false".to_string())
            .eq_ignore_ascii_case("true");

        let (database, cache) = if skip_externals {
            (None, None)
        } else {
            (
                Some(DatabaseConfig::from_env()?),
                Some(CacheConfig::from_env()?),
            )
        };

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database,
            cache,
            logging: LoggingConfig::from_env()?,
            supplier: SupplierConfig::from_env()?,
            checkout: CheckoutConfig::from_env()?,
            smart_save: SmartSaveConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        if let Some(cache) = &self.cache {
            cache.validate()?;
        }
        self.logging.validate()?;
        self.supplier.validate()?;
        self.checkout.validate()?;
        self.smart_save.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: required_var("DATABASE_URL")?,
            max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: parse_var("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            default_ttl: parse_var("CACHE_DEFAULT_TTL", "3600")?,
            max_connections: parse_var("CACHE_MAX_CONNECTIONS", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl SupplierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env::var("SUPPLIER_BASE_URL")
            .unwrap_or_else(|_| "https://test.api.supplier.example".to_string());
        let token_url = env::var("SUPPLIER_TOKEN_URL")
            .unwrap_or_else(|_| format!("{}/v1/security/oauth2/token", base_url));

        Ok(SupplierConfig {
            base_url,
            token_url,
            client_id: required_var("SUPPLIER_CLIENT_ID")?,
            client_secret: required_var("SUPPLIER_CLIENT_SECRET")?,
            token_safety_margin_secs: parse_var("SUPPLIER_TOKEN_SAFETY_MARGIN_SECS", "60")?,
            max_attempts: parse_var("SUPPLIER_MAX_ATTEMPTS", "3")?,
            base_delay_ms: parse_var("SUPPLIER_BASE_DELAY_MS", "500")?,
            backoff_multiplier: parse_var("SUPPLIER_BACKOFF_MULTIPLIER", "2.0")?,
            max_delay_ms: parse_var("SUPPLIER_MAX_DELAY_MS", "8000")?,
            request_timeout_secs: parse_var("SUPPLIER_TIMEOUT_SECS", "20")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_http_url(&self.base_url) {
            return Err(ConfigError::InvalidValue("SUPPLIER_BASE_URL".to_string()));
        }
        if !is_http_url(&self.token_url) {
            return Err(ConfigError::InvalidValue("SUPPLIER_TOKEN_URL".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "SUPPLIER_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationFailed(
                "SUPPLIER_BACKOFF_MULTIPLIER must be >= 1.0".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::ValidationFailed(
                "SUPPLIER_MAX_DELAY_MS must be >= SUPPLIER_BASE_DELAY_MS".to_string(),
            ));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CheckoutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CheckoutConfig {
            api_base_url: env::var("CHECKOUT_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            secret_key: required_var("CHECKOUT_SECRET_KEY")?,
            webhook_secret: required_var("CHECKOUT_WEBHOOK_SECRET")?,
            settlement_currency: env::var("SETTLEMENT_CURRENCY")
                .unwrap_or_else(|_| "USD".to_string())
                .trim()
                .to_uppercase(),
            session_ttl_secs: parse_var("CHECKOUT_SESSION_TTL_SECS", "1800")?,
            success_url: env::var("CHECKOUT_SUCCESS_URL").unwrap_or_else(|_| {
                "http://localhost:3000/booking/success?booking_id={BOOKING_ID}".to_string()
            }),
            cancel_url: env::var("CHECKOUT_CANCEL_URL").unwrap_or_else(|_| {
                "http://localhost:3000/booking/cancelled?booking_id={BOOKING_ID}".to_string()
            }),
            webhook_tolerance_secs: parse_var("CHECKOUT_WEBHOOK_TOLERANCE_SECS", "300")?,
            request_timeout_secs: parse_var("CHECKOUT_TIMEOUT_SECS", "15")?,
            max_retries: parse_var("CHECKOUT_MAX_RETRIES", "2")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settlement_currency.len() != 3
            || !self
                .settlement_currency
                .chars()
                .all(|c| c.is_ascii_alphabetic())
        {
            return Err(ConfigError::InvalidValue("SETTLEMENT_CURRENCY".to_string()));
        }
        if !is_http_url(&self.api_base_url) {
            return Err(ConfigError::InvalidValue("CHECKOUT_API_BASE_URL".to_string()));
        }
        if !is_http_url(&self.success_url) || !is_http_url(&self.cancel_url) {
            return Err(ConfigError::ValidationFailed(
                "CHECKOUT_SUCCESS_URL and CHECKOUT_CANCEL_URL must be absolute URLs".to_string(),
            ));
        }
        if self.session_ttl_secs < 60 {
            return Err(ConfigError::ValidationFailed(
                "CHECKOUT_SESSION_TTL_SECS must be at least 60".to_string(),
            ));
        }
        if self.webhook_tolerance_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "CHECKOUT_WEBHOOK_TOLERANCE_SECS".to_string(),
            ));
        }

        Ok(())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs as i64)
    }
}

impl SmartSaveConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SmartSaveConfig {
            fee_percent: parse_var("SMART_SAVE_FEE_PERCENT", "1.0")?,
            min_savings_usd: parse_var("SMART_SAVE_MIN_SAVINGS_USD", "1.00")?,
            result_ttl_secs: parse_var("SMART_SAVE_RESULT_TTL_SECS", "120")?,
            rate_ttl_secs: parse_var("FX_RATE_TTL_SECS", "900")?,
            rate_limit_requests: parse_var("SMART_SAVE_RATE_LIMIT_REQUESTS", "20")?,
            rate_limit_window_secs: parse_var("SMART_SAVE_RATE_LIMIT_WINDOW_SECS", "60")?,
            rates_api_url: env::var("FX_RATES_API_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            rates_api_key: env::var("FX_RATES_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = BigDecimal::from(0);
        if self.fee_percent < zero || self.fee_percent >= BigDecimal::from(100) {
            return Err(ConfigError::ValidationFailed(
                "SMART_SAVE_FEE_PERCENT must be in [0, 100)".to_string(),
            ));
        }
        if self.min_savings_usd < zero {
            return Err(ConfigError::InvalidValue(
                "SMART_SAVE_MIN_SAVINGS_USD".to_string(),
            ));
        }
        if self.rate_limit_requests == 0 || self.rate_limit_window_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "SmartSave rate limit budget and window must be positive".to_string(),
            ));
        }
        if let Some(url) = &self.rates_api_url {
            if !is_http_url(url) {
                return Err(ConfigError::InvalidValue("FX_RATES_API_URL".to_string()));
            }
        }

        Ok(())
    }
}

impl Default for SmartSaveConfig {
    fn default() -> Self {
        Self {
            fee_percent: BigDecimal::from(1),
            min_savings_usd: BigDecimal::from(1),
            result_ttl_secs: 120,
            rate_ttl_secs: 900,
            rate_limit_requests: 20,
            rate_limit_window_secs: 60,
            rates_api_url: None,
            rates_api_key: None,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
