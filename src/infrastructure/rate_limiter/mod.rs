//! Rate Limiting Infrastructure
//!
//! Tiered token bucket rate limiting behind a backend-agnostic service trait:
//! - Token bucket algorithm with lazy refill (allows bursts up to capacity)
//! - Four scoping tiers (global, auth, user, endpoint) with per-tier configs
//! - In-memory store for single-instance deployments
//! - Redis store for distributed deployments, degrading to memory on outages
//! - IP allowlist supporting exact addresses, CIDR blocks, and ranges

pub mod allowlist;
pub mod factory;
pub mod redis_backend;
pub mod service;
pub mod store;
pub mod types;

pub use allowlist::IpAllowlist;
pub use factory::{build_rate_limiter, spawn_eviction_task, tier_configs};
pub use redis_backend::RedisRateLimiter;
pub use service::{MemoryRateLimiter, RateLimiterService};
pub use types::{LimiterError, RateLimitResult, RateLimiterMetrics, Tier, TierConfig};
