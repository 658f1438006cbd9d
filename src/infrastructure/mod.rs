//! Infrastructure Layer - External concerns and implementations
//!
//! This module holds the rate limiting backends and their supporting pieces.

pub mod rate_limiter;

pub use rate_limiter::{
    IpAllowlist, LimiterError, MemoryRateLimiter, RateLimitResult, RateLimiterMetrics,
    RateLimiterService, RedisRateLimiter, Tier, TierConfig, build_rate_limiter,
    spawn_eviction_task,
};
