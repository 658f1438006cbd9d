//! Rate limiter service
//!
//! Tier-aware facade over the token bucket store. Owns the tier → quota
//! mapping and the process-wide metrics counters. Backends implement
//! [`RateLimiterService`]; the middleware only ever sees the trait object
//! handed to it at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::store::TokenBucketStore;
use super::types::{LimiterError, RateLimitResult, RateLimiterMetrics, Tier, TierConfig};

/// Default quotas per tier. `global` contains floods per IP, `auth` throttles
/// credential guessing, `user` meters authenticated identities, `endpoint`
/// backs per-route overrides.
pub const DEFAULT_GLOBAL_MAX_REQUESTS: u32 = 1000;
pub const DEFAULT_GLOBAL_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_AUTH_MAX_REQUESTS: u32 = 5;
pub const DEFAULT_AUTH_WINDOW_SECONDS: u64 = 900;
pub const DEFAULT_USER_MAX_REQUESTS: u32 = 100;
pub const DEFAULT_USER_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_ENDPOINT_MAX_REQUESTS: u32 = 1000;
pub const DEFAULT_ENDPOINT_WINDOW_SECONDS: u64 = 60;

/// The built-in tier → config map
pub fn default_tier_configs() -> HashMap<Tier, TierConfig> {
    HashMap::from([
        (
            Tier::Global,
            TierConfig::new(DEFAULT_GLOBAL_MAX_REQUESTS, DEFAULT_GLOBAL_WINDOW_SECONDS),
        ),
        (
            Tier::Auth,
            TierConfig::new(DEFAULT_AUTH_MAX_REQUESTS, DEFAULT_AUTH_WINDOW_SECONDS),
        ),
        (
            Tier::User,
            TierConfig::new(DEFAULT_USER_MAX_REQUESTS, DEFAULT_USER_WINDOW_SECONDS),
        ),
        (
            Tier::Endpoint,
            TierConfig::new(
                DEFAULT_ENDPOINT_MAX_REQUESTS,
                DEFAULT_ENDPOINT_WINDOW_SECONDS,
            ),
        ),
    ])
}

/// Tier-aware admission control surface shared by every backend
#[async_trait]
pub trait RateLimiterService: Send + Sync {
    /// Refill and consume one token for the key.
    ///
    /// A tier with no configuration entry fails open: the call logs the
    /// anomaly and returns an unlimited allow, never an error. Errors are
    /// reserved for backend failures and are mapped to allow decisions at
    /// the middleware call site.
    async fn check_limit(&self, key: &str, tier: Tier) -> Result<RateLimitResult, LimiterError>;

    /// Report current state without consuming a token or touching metrics
    async fn peek(&self, key: &str, tier: Tier) -> Result<RateLimitResult, LimiterError>;

    /// Delete one bucket; the next check sees full capacity
    async fn reset(&self, key: &str, tier: Tier);

    /// Clear one tier across all keys, or the entire store
    async fn reset_all(&self, tier: Option<Tier>);

    /// Remove buckets idle longer than `max_age_secs`; returns evicted count
    async fn evict_idle(&self, max_age_secs: u64) -> usize;

    /// Snapshot copy of the process-wide counters
    async fn metrics(&self) -> RateLimiterMetrics;

    /// Active backend label, including degraded-fallback labeling
    fn backend_name(&self) -> String;
}

/// Monotonic counters shared between a backend and its fallback
pub struct MetricsRecorder {
    total_requests: AtomicU64,
    allowed_requests: AtomicU64,
    blocked_requests: AtomicU64,
    violations_by_tier: RwLock<HashMap<Tier, u64>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            allowed_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            violations_by_tier: RwLock::new(HashMap::new()),
        }
    }

    /// Count one decision; blocked decisions also count as tier violations
    pub async fn record(&self, result: &RateLimitResult) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if result.allowed {
            self.allowed_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            let mut violations = self.violations_by_tier.write().await;
            *violations.entry(result.tier).or_insert(0) += 1;
        }
    }

    /// Copy out the counters; the returned value shares nothing with the recorder
    pub async fn snapshot(&self, backend: &str) -> RateLimiterMetrics {
        let total = self.total_requests.load(Ordering::Relaxed);
        let blocked = self.blocked_requests.load(Ordering::Relaxed);
        let block_rate = if total == 0 {
            0.0
        } else {
            blocked as f64 / total as f64 * 100.0
        };

        RateLimiterMetrics {
            total_requests: total,
            allowed_requests: self.allowed_requests.load(Ordering::Relaxed),
            blocked_requests: blocked,
            block_rate,
            violations_by_tier: self.violations_by_tier.read().await.clone(),
            backend: backend.to_string(),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory rate limiter
///
/// The default backend. State is explicitly ephemeral: buckets vanish on
/// process exit, and a key idle past the eviction age starts over with a
/// full bucket.
pub struct MemoryRateLimiter {
    store: TokenBucketStore,
    tiers: HashMap<Tier, TierConfig>,
    metrics: Arc<MetricsRecorder>,
}

impl MemoryRateLimiter {
    pub fn new(tiers: HashMap<Tier, TierConfig>) -> Self {
        Self {
            store: TokenBucketStore::new(),
            tiers,
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_tier_configs())
    }

    /// Counter handle shared with a wrapping backend so degraded calls
    /// count exactly once
    pub(crate) fn metrics_handle(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    pub(crate) fn tier_config(&self, tier: Tier) -> Option<&TierConfig> {
        self.tiers.get(&tier)
    }

    /// Live bucket count, for tests and the admin surface
    pub async fn bucket_count(&self) -> usize {
        self.store.len().await
    }
}

#[async_trait]
impl RateLimiterService for MemoryRateLimiter {
    async fn check_limit(&self, key: &str, tier: Tier) -> Result<RateLimitResult, LimiterError> {
        let Some(config) = self.tiers.get(&tier) else {
            warn!(tier = %tier, key = %key, "No rate limit configuration for tier, failing open");
            let result = RateLimitResult::unlimited(tier);
            self.metrics.record(&result).await;
            return Ok(result);
        };

        let result = self.store.check(key, tier, config).await;
        self.metrics.record(&result).await;

        if !result.allowed {
            debug!(
                key = %key,
                tier = %tier,
                retry_after = ?result.retry_after,
                "Rate limit exceeded"
            );
        }

        Ok(result)
    }

    async fn peek(&self, key: &str, tier: Tier) -> Result<RateLimitResult, LimiterError> {
        let Some(config) = self.tiers.get(&tier) else {
            return Ok(RateLimitResult::unlimited(tier));
        };
        Ok(self.store.peek(key, tier, config).await)
    }

    async fn reset(&self, key: &str, tier: Tier) {
        self.store.remove(key, tier).await;
    }

    async fn reset_all(&self, tier: Option<Tier>) {
        self.store.clear(tier).await;
    }

    async fn evict_idle(&self, max_age_secs: u64) -> usize {
        self.store.evict_idle(max_age_secs).await
    }

    async fn metrics(&self) -> RateLimiterMetrics {
        self.metrics.snapshot(&self.backend_name()).await
    }

    fn backend_name(&self) -> String {
        "memory".to_string()
    }
}
