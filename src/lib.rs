//! Sluice - Tiered token bucket rate limiting for HTTP services
//!
//! This crate provides the admission-control core and its HTTP integration:
//!
//! # Modules
//!
//! - [`config`] — Strongly-typed configuration with file and environment variable support
//! - [`infrastructure`] — Token bucket store, limiter backends, allowlist parsing
//! - [`presentation`] — Axum middleware layers, route wiring, response models
//! - [`logging`] — Structured logging with tracing
//!
//! # Architecture
//!
//! ```text
//! sluice/
//! ├── config/           # Configuration management and validation
//! ├── infrastructure/
//! │   └── rate_limiter/ # Store, service trait, memory and redis backends
//! ├── presentation/
//! │   ├── middleware/   # Identity extraction and tiered limiting layers
//! │   └── routes.rs     # Router assembly and admin endpoints
//! ├── app.rs            # Dependency wiring
//! └── logging.rs        # Tracing subscriber setup
//! ```
//!
//! # Configuration
//!
//! Load configuration from files and environment:
//!
//! ```rust,ignore
//! use sluice::AppConfig;
//!
//! let config = AppConfig::load()?;
//! ```
//!
//! Environment variables use the `SLUICE__` prefix with double underscore
//! separators:
//!
//! ```bash
//! SLUICE__SERVER__PORT=3000
//! SLUICE__RATE_LIMIT__BACKEND=redis
//! SLUICE__RATE_LIMIT__AUTH__MAX_REQUESTS=5
//! ```
//!
//! # Fail-open contract
//!
//! No internal limiter failure is ever user-visible as anything other than
//! "request proceeded without rate limiting". The only deliberate negative
//! outcome is a 429 on a genuine limit breach.

mod app;
pub mod config;
pub mod infrastructure;
pub mod logging;
pub mod presentation;

pub use app::{AppHandle, create_app};
pub use config::AppConfig;
pub use infrastructure::rate_limiter::{
    IpAllowlist, LimiterError, MemoryRateLimiter, RateLimitResult, RateLimiterMetrics,
    RateLimiterService, RedisRateLimiter, Tier, TierConfig, build_rate_limiter,
};
pub use logging::init_tracing;
