//! Rate limiter types and core data structures

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Traffic tier for rate limiting
/// Determines which quota bucket namespace applies to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Per-IP limit applied to all traffic (DDoS containment)
    Global,
    /// Per-IP limit on login-type endpoints (brute-force containment)
    Auth,
    /// Per-identity limit for authenticated traffic
    User,
    /// Per-route limit under a caller-chosen key prefix
    Endpoint,
}

impl Tier {
    /// Get the tier name for keys, logging and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::Auth => "auth",
            Tier::User => "user",
            Tier::Endpoint => "endpoint",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-tier quota configuration
///
/// `max_requests` doubles as the bucket capacity and the nominal quota per
/// window. `refill_rate` is tokens per second, derived from the other two
/// fields unless explicitly overridden.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Bucket capacity and nominal requests per window
    pub max_requests: u32,
    /// Nominal window length in seconds
    pub window_seconds: u64,
    /// Refill rate in tokens per second
    pub refill_rate: f64,
}

impl TierConfig {
    /// Create a config with the refill rate derived as `max_requests / window_seconds`
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
            refill_rate: f64::from(max_requests) / window_seconds as f64,
        }
    }

    /// Override the derived refill rate
    pub fn with_refill_rate(mut self, refill_rate: f64) -> Self {
        self.refill_rate = refill_rate;
        self
    }

    /// Seconds until one token becomes available on an empty bucket.
    ///
    /// ceil(1 / refill_rate), with a small tolerance so a derived rate like
    /// 5/900 yields exactly 180 instead of tipping over to 181 on float noise.
    pub fn retry_after_secs(&self) -> u64 {
        ((1.0 / self.refill_rate) - 1e-9).ceil().max(1.0) as u64
    }
}

/// Token bucket state for a single (key, tier) pair
///
/// Serializable so distributed backends can store it as a JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucket {
    /// Current number of tokens, fractional between refills
    pub tokens: f64,
    /// Maximum number of tokens the bucket can hold
    pub capacity: f64,
    /// Refill rate in tokens per second
    pub refill_rate: f64,
    /// Last refill time, Unix milliseconds
    pub last_refill_ms: u64,
}

impl TokenBucket {
    /// Create a full bucket; the first request for a key always succeeds
    pub fn new(config: &TierConfig) -> Self {
        Self {
            tokens: f64::from(config.max_requests),
            capacity: f64::from(config.max_requests),
            refill_rate: config.refill_rate,
            last_refill_ms: current_time_millis(),
        }
    }

    /// Lazily refill based on elapsed wall time, clamping to `[0, capacity]`.
    ///
    /// Must run immediately before every consume attempt. A clock that moves
    /// backwards counts as zero elapsed time.
    pub fn refill(&mut self, now_ms: u64) {
        let elapsed_secs = now_ms.saturating_sub(self.last_refill_ms) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_secs * self.refill_rate)
            .min(self.capacity)
            .max(0.0);
        self.last_refill_ms = now_ms;
    }

    /// Take one token if at least one is available
    pub fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available
    pub fn remaining(&self) -> u32 {
        self.tokens.floor() as u32
    }

    /// Unix seconds at which the bucket is expected to be full again.
    ///
    /// `last_refill + window` is an estimate of full-bucket time, not a
    /// precise guarantee; clients treat it as advisory.
    pub fn reset_at(&self, window_seconds: u64) -> u64 {
        self.last_refill_ms / 1000 + window_seconds
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Maximum requests allowed in the current window
    pub limit: u32,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Unix timestamp (seconds) when the bucket is expected to be full
    pub reset_at: u64,
    /// Retry-After duration in seconds (only set when blocked)
    pub retry_after: Option<u64>,
    /// The tier that was applied
    pub tier: Tier,
}

impl RateLimitResult {
    /// Create a new allowed result
    pub fn allowed(limit: u32, remaining: u32, reset_at: u64, tier: Tier) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
            retry_after: None,
            tier,
        }
    }

    /// Create a new blocked result
    pub fn blocked(limit: u32, reset_at: u64, retry_after: u64, tier: Tier) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
            tier,
        }
    }

    /// Unconstrained allow, used when a tier has no configuration entry.
    /// The limiter fails open rather than erroring on a config gap.
    pub fn unlimited(tier: Tier) -> Self {
        Self {
            allowed: true,
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at: current_time_secs(),
            retry_after: None,
            tier,
        }
    }
}

/// Snapshot of process-wide limiter counters
///
/// Counters start at zero when the service is constructed and only ever
/// increase. Callers get a copy; mutating it has no effect on the service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    /// Blocked share of total, in percent
    pub block_rate: f64,
    pub violations_by_tier: HashMap<Tier, u64>,
    /// Active backend label, including degraded-fallback labeling
    pub backend: String,
}

/// Failures a rate limit check can surface.
///
/// The middleware maps every variant to an allow decision in one place;
/// no limiter failure may turn into a user-visible error.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    #[error("rate limit backend error: {0}")]
    Backend(String),

    #[error("rate limit backend timed out after {0}ms")]
    Timeout(u64),

    #[error("failed to encode bucket state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Get current time in milliseconds since Unix epoch
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Get current time in seconds since Unix epoch
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Global.as_str(), "global");
        assert_eq!(Tier::Auth.as_str(), "auth");
        assert_eq!(Tier::User.as_str(), "user");
        assert_eq!(Tier::Endpoint.as_str(), "endpoint");
        assert_eq!(format!("{}", Tier::Auth), "auth");
    }

    #[test]
    fn test_tier_config_derives_refill_rate() {
        let config = TierConfig::new(1000, 60);
        assert!((config.refill_rate - 1000.0 / 60.0).abs() < 1e-9);

        let overridden = TierConfig::new(100, 60).with_refill_rate(0.5);
        assert!((overridden.refill_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_retry_after_for_auth_defaults() {
        // 5 requests / 900s => one token every 180s
        let config = TierConfig::new(5, 900);
        assert_eq!(config.retry_after_secs(), 180);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let config = TierConfig::new(100, 60).with_refill_rate(0.3);
        assert_eq!(config.retry_after_secs(), 4);
    }

    #[test]
    fn test_bucket_starts_full() {
        let config = TierConfig::new(10, 60);
        let bucket = TokenBucket::new(&config);
        assert!((bucket.tokens - 10.0).abs() < 1e-9);
        assert_eq!(bucket.remaining(), 10);
    }

    #[test]
    fn test_refill_clamps_at_capacity() {
        let config = TierConfig::new(5, 60);
        let mut bucket = TokenBucket::new(&config);

        // Pretend the bucket sat idle for ten minutes
        bucket.last_refill_ms = bucket.last_refill_ms.saturating_sub(600_000);
        bucket.refill(current_time_millis());

        assert!(bucket.tokens <= bucket.capacity);
        assert_eq!(bucket.remaining(), 5);
    }

    #[test]
    fn test_consume_drains_then_denies() {
        let config = TierConfig::new(3, 60);
        let mut bucket = TokenBucket::new(&config);

        assert!(bucket.try_consume());
        assert!(bucket.try_consume());
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());
        assert!(bucket.tokens >= 0.0);
    }

    #[test]
    fn test_refill_restores_tokens_over_time() {
        let config = TierConfig::new(2, 2); // 1 token per second
        let mut bucket = TokenBucket::new(&config);
        assert!(bucket.try_consume());
        assert!(bucket.try_consume());
        assert!(!bucket.try_consume());

        // Rewind the refill clock instead of sleeping
        bucket.last_refill_ms = bucket.last_refill_ms.saturating_sub(1_500);
        bucket.refill(current_time_millis());
        assert!(bucket.try_consume());
    }

    #[test]
    fn test_backwards_clock_is_zero_elapsed() {
        let config = TierConfig::new(5, 60);
        let mut bucket = TokenBucket::new(&config);
        bucket.try_consume();
        let before = bucket.tokens;

        bucket.refill(bucket.last_refill_ms.saturating_sub(10_000));
        assert!((bucket.tokens - before).abs() < 1e-9);
    }

    #[test]
    fn test_result_constructors() {
        let ok = RateLimitResult::allowed(100, 50, 1_234_567_890, Tier::Global);
        assert!(ok.allowed);
        assert_eq!(ok.remaining, 50);
        assert!(ok.retry_after.is_none());

        let blocked = RateLimitResult::blocked(100, 1_234_567_890, 60, Tier::Auth);
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
        assert_eq!(blocked.retry_after, Some(60));

        let unlimited = RateLimitResult::unlimited(Tier::User);
        assert!(unlimited.allowed);
        assert_eq!(unlimited.limit, u32::MAX);
    }
}
