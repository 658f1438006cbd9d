//! Configuration validation module

use crate::config::{AppConfig, LoggingConfig, RateLimitBackend, RateLimitSettings, ServerConfig};

/// Trait for validating configuration sections
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Server configuration error: {message}")]
    Server { message: String },

    #[error("Logging configuration error: {message}")]
    Logging { message: String },

    #[error("Rate limit configuration error: {message}")]
    RateLimit { message: String },
}

impl ValidationError {
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
        }
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // u16 cannot exceed 65535, so only 0 needs rejecting
        if self.port == 0 {
            return Err(ValidationError::server(format!(
                "Port must be in range 1-65535, got {}",
                self.port
            )));
        }

        if self.host.is_empty() {
            return Err(ValidationError::server("Host cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(ValidationError::logging(format!(
                "Log level must be one of {:?}, got: {}",
                LEVELS, self.level
            )));
        }

        Ok(())
    }
}

impl Validate for RateLimitSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.cleanup_interval_seconds == 0 {
            return Err(ValidationError::rate_limit(
                "Cleanup interval must be greater than 0 seconds".to_string(),
            ));
        }

        if self.idle_max_age_seconds == 0 {
            return Err(ValidationError::rate_limit(
                "Idle max age must be greater than 0 seconds".to_string(),
            ));
        }

        if self.backend == RateLimitBackend::Redis
            && !self.redis_url.starts_with("redis://")
            && !self.redis_url.starts_with("rediss://")
        {
            return Err(ValidationError::rate_limit(format!(
                "Redis URL must start with redis:// or rediss://, got: {}",
                self.redis_url
            )));
        }

        for (name, tier) in [
            ("global", &self.global),
            ("auth", &self.auth),
            ("user", &self.user),
            ("endpoint", &self.endpoint),
        ] {
            if tier.max_requests == Some(0) {
                return Err(ValidationError::rate_limit(format!(
                    "Tier '{}' max_requests must be greater than 0",
                    name
                )));
            }
            if tier.window_seconds == Some(0) {
                return Err(ValidationError::rate_limit(format!(
                    "Tier '{}' window_seconds must be greater than 0",
                    name
                )));
            }
            if let Some(rate) = tier.refill_rate {
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(ValidationError::rate_limit(format!(
                        "Tier '{}' refill_rate must be a positive number, got {}",
                        name, rate
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierSettings;

    #[test]
    fn test_server_rejects_port_zero() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_rejects_empty_host() {
        let config = ServerConfig {
            host: String::new(),
            port: 3000,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_logging_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "verbose".to_string(),
            format: "json".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_rejects_zero_window() {
        let settings = RateLimitSettings {
            auth: TierSettings {
                window_seconds: Some(0),
                ..TierSettings::default()
            },
            ..RateLimitSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rate_limit_rejects_negative_refill_rate() {
        let settings = RateLimitSettings {
            global: TierSettings {
                refill_rate: Some(-1.0),
                ..TierSettings::default()
            },
            ..RateLimitSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_redis_backend_requires_redis_url() {
        let settings = RateLimitSettings {
            backend: RateLimitBackend::Redis,
            redis_url: "http://localhost".to_string(),
            ..RateLimitSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = RateLimitSettings {
            backend: RateLimitBackend::Redis,
            ..RateLimitSettings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_memory_backend_ignores_redis_url() {
        let settings = RateLimitSettings {
            backend: RateLimitBackend::Memory,
            redis_url: "not-a-url".to_string(),
            ..RateLimitSettings::default()
        };
        assert!(settings.validate().is_ok());
    }
}
