//! Application configuration
//!
//! Strongly-typed configuration with file and environment variable support.
//! Environment variables use the `SLUICE__` prefix with double underscore
//! separators, e.g. `SLUICE__RATE_LIMIT__AUTH__MAX_REQUESTS=5`.
//!
//! Configuration is parsed once in the composition layer and handed to
//! constructors as plain structs; nothing in the core reads the environment.

pub mod validation;

use serde::{Deserialize, Serialize};

pub use validation::{Validate, ValidationError};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub rate_limit: RateLimitSettings,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Grace period for background tasks after a shutdown signal
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            shutdown_timeout_seconds: 5,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Storage backend for rate limit buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
    /// Per-process buckets, ephemeral by design
    #[default]
    Memory,
    /// Shared buckets in Redis, degrading to memory when unreachable
    Redis,
}

/// Per-tier quota overrides
///
/// Unset fields fall back to the tier's built-in defaults at construction
/// time, so each tier's ceiling and window are independently overridable.
/// `refill_rate` is derived as `max_requests / window_seconds` unless set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    pub max_requests: Option<u32>,
    pub window_seconds: Option<u64>,
    pub refill_rate: Option<f64>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Storage backend for buckets
    pub backend: RateLimitBackend,
    /// Redis connection URL, used when `backend` is `redis`
    pub redis_url: String,
    /// Comma- or newline-separated allowlist entries (IP, CIDR, or range)
    pub allowlist: String,
    /// How often the idle-bucket sweeper runs, in seconds
    pub cleanup_interval_seconds: u64,
    /// Buckets idle longer than this are evicted, in seconds
    pub idle_max_age_seconds: u64,
    pub global: TierSettings,
    pub auth: TierSettings,
    pub user: TierSettings,
    pub endpoint: TierSettings,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: RateLimitBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            allowlist: String::new(),
            cleanup_interval_seconds: 300, // 5 minutes
            idle_max_age_seconds: 3600,    // 1 hour
            global: TierSettings::default(),
            auth: TierSettings::default(),
            user: TierSettings::default(),
            endpoint: TierSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        // Add environment-specific config if ENV is set
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{}", env)).required(false));
        }

        // Add local config and environment variables last (highest priority)
        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("SLUICE").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),
}
