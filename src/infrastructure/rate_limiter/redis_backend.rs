//! Redis-backed rate limiter
//!
//! Distributed variant of the service. It owns an in-memory limiter and
//! degrades to it whenever Redis is unreachable, times out, or errors, so
//! the limiter is never a single point of failure. Degradation is visible
//! through [`RateLimiterService::backend_name`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::service::{MemoryRateLimiter, MetricsRecorder, RateLimiterService};
use super::types::{
    LimiterError, RateLimitResult, RateLimiterMetrics, Tier, TierConfig, TokenBucket,
    current_time_millis,
};

/// Budget for the initial connect + PING probe
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Budget for each Redis round trip on the request path
const OP_TIMEOUT: Duration = Duration::from_millis(500);
/// Batch size for SCAN-based key enumeration
const SCAN_COUNT: u32 = 100;

/// Distributed rate limiter with an explicit in-memory fallback
pub struct RedisRateLimiter {
    inner: MemoryRateLimiter,
    connection: Option<ConnectionManager>,
    degraded: AtomicBool,
    metrics: Arc<MetricsRecorder>,
    key_prefix: String,
}

impl RedisRateLimiter {
    /// Connect to Redis, falling back to memory-only mode when the probe
    /// fails. Construction itself never fails.
    pub async fn connect(url: &str, tiers: HashMap<Tier, TierConfig>) -> Self {
        let inner = MemoryRateLimiter::new(tiers);
        let metrics = inner.metrics_handle();

        let connection = match Self::try_connect(url).await {
            Ok(connection) => {
                info!(url = %url, "Rate limiter connected to Redis backend");
                Some(connection)
            }
            Err(e) => {
                warn!(
                    url = %url,
                    error = %e,
                    "Failed to connect to Redis for rate limiting, falling back to in-memory"
                );
                None
            }
        };

        let degraded = AtomicBool::new(connection.is_none());
        Self {
            inner,
            connection,
            degraded,
            metrics,
            key_prefix: "ratelimit".to_string(),
        }
    }

    async fn try_connect(url: &str) -> Result<ConnectionManager, String> {
        let client =
            redis::Client::open(url).map_err(|e| format!("Failed to create Redis client: {}", e))?;

        let connection = timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| "Timed out establishing Redis connection".to_string())?
            .map_err(|e| format!("Failed to create connection manager: {}", e))?;

        let mut probe = connection.clone();
        timeout(
            CONNECT_TIMEOUT,
            redis::cmd("PING").query_async::<String>(&mut probe),
        )
        .await
        .map_err(|_| "Timed out pinging Redis".to_string())?
        .map_err(|e| format!("Failed to ping Redis: {}", e))?;

        Ok(connection)
    }

    fn redis_key(&self, key: &str, tier: Tier) -> String {
        format!("{}:{}:{}", self.key_prefix, tier, key)
    }

    /// TTL for stored bucket state. A bucket untouched for two windows has
    /// refilled completely, so letting it expire is unobservable.
    fn state_ttl(config: &TierConfig) -> u64 {
        (config.window_seconds * 2).max(60)
    }

    /// Distributed refill-then-consume against the shared Redis state.
    ///
    /// TODO: fold this read-modify-write into a Lua script so two instances
    /// racing on the same key cannot double-spend a token.
    async fn distributed_check(
        &self,
        connection: &ConnectionManager,
        key: &str,
        tier: Tier,
        config: &TierConfig,
    ) -> Result<RateLimitResult, LimiterError> {
        let mut conn = connection.clone();
        let redis_key = self.redis_key(key, tier);
        let op_ms = OP_TIMEOUT.as_millis() as u64;

        let value: Option<String> = timeout(
            OP_TIMEOUT,
            redis::cmd("GET").arg(&redis_key).query_async(&mut conn),
        )
        .await
        .map_err(|_| LimiterError::Timeout(op_ms))?
        .map_err(|e| LimiterError::Backend(format!("Redis GET error: {}", e)))?;

        let mut bucket = match value {
            Some(json) => serde_json::from_str(&json)?,
            None => TokenBucket::new(config),
        };

        bucket.refill(current_time_millis());
        let allowed = bucket.try_consume();

        let json = serde_json::to_string(&bucket)?;
        timeout(
            OP_TIMEOUT,
            redis::cmd("SET")
                .arg(&redis_key)
                .arg(json)
                .arg("EX")
                .arg(Self::state_ttl(config))
                .query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| LimiterError::Timeout(op_ms))?
        .map_err(|e| LimiterError::Backend(format!("Redis SET error: {}", e)))?;

        let result = if allowed {
            RateLimitResult::allowed(
                config.max_requests,
                bucket.remaining(),
                bucket.reset_at(config.window_seconds),
                tier,
            )
        } else {
            RateLimitResult::blocked(
                config.max_requests,
                bucket.reset_at(config.window_seconds),
                config.retry_after_secs(),
                tier,
            )
        };
        Ok(result)
    }

    /// Delete every key under the prefix (optionally narrowed to one tier)
    async fn distributed_clear(
        &self,
        connection: &ConnectionManager,
        tier: Option<Tier>,
    ) -> Result<(), LimiterError> {
        let mut conn = connection.clone();
        let pattern = match tier {
            Some(tier) => format!("{}:{}:*", self.key_prefix, tier),
            None => format!("{}:*", self.key_prefix),
        };
        let op_ms = OP_TIMEOUT.as_millis() as u64;

        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = timeout(
                OP_TIMEOUT,
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn),
            )
            .await
            .map_err(|_| LimiterError::Timeout(op_ms))?
            .map_err(|e| LimiterError::Backend(format!("Redis SCAN error: {}", e)))?;

            if !keys.is_empty() {
                timeout(
                    OP_TIMEOUT,
                    redis::cmd("DEL").arg(&keys).query_async::<i64>(&mut conn),
                )
                .await
                .map_err(|_| LimiterError::Timeout(op_ms))?
                .map_err(|e| LimiterError::Backend(format!("Redis DEL error: {}", e)))?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }

    fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Relaxed);
    }

    fn mark_healthy(&self) {
        self.degraded.store(false, Ordering::Relaxed);
    }

    fn is_degraded(&self) -> bool {
        self.connection.is_none() || self.degraded.load(Ordering::Relaxed)
    }

    /// Live bucket count of the in-memory fallback
    pub async fn fallback_bucket_count(&self) -> usize {
        self.inner.bucket_count().await
    }
}

#[async_trait]
impl RateLimiterService for RedisRateLimiter {
    async fn check_limit(&self, key: &str, tier: Tier) -> Result<RateLimitResult, LimiterError> {
        // Tier config gaps fail open inside the inner limiter
        let Some(config) = self.inner.tier_config(tier).copied() else {
            return self.inner.check_limit(key, tier).await;
        };

        let Some(connection) = &self.connection else {
            return self.inner.check_limit(key, tier).await;
        };

        match self.distributed_check(connection, key, tier, &config).await {
            Ok(result) => {
                self.mark_healthy();
                self.metrics.record(&result).await;
                if !result.allowed {
                    debug!(key = %key, tier = %tier, "Rate limit exceeded (redis)");
                }
                Ok(result)
            }
            Err(e) => {
                self.mark_degraded();
                warn!(
                    key = %key,
                    tier = %tier,
                    error = %e,
                    "Distributed rate limit check failed, serving from in-memory fallback"
                );
                self.inner.check_limit(key, tier).await
            }
        }
    }

    async fn peek(&self, key: &str, tier: Tier) -> Result<RateLimitResult, LimiterError> {
        let Some(config) = self.inner.tier_config(tier).copied() else {
            return Ok(RateLimitResult::unlimited(tier));
        };

        let Some(connection) = &self.connection else {
            return self.inner.peek(key, tier).await;
        };

        let mut conn = connection.clone();
        let redis_key = self.redis_key(key, tier);
        let fetched: Result<Option<String>, LimiterError> = timeout(
            OP_TIMEOUT,
            redis::cmd("GET").arg(&redis_key).query_async(&mut conn),
        )
        .await
        .map_err(|_| LimiterError::Timeout(OP_TIMEOUT.as_millis() as u64))
        .and_then(|r| r.map_err(|e| LimiterError::Backend(format!("Redis GET error: {}", e))));

        match fetched {
            Ok(Some(json)) => {
                let mut bucket: TokenBucket = serde_json::from_str(&json)?;
                bucket.refill(current_time_millis());
                Ok(RateLimitResult::allowed(
                    config.max_requests,
                    bucket.remaining(),
                    bucket.reset_at(config.window_seconds),
                    tier,
                ))
            }
            Ok(None) => Ok(RateLimitResult::allowed(
                config.max_requests,
                config.max_requests,
                current_time_millis() / 1000 + config.window_seconds,
                tier,
            )),
            Err(e) => {
                debug!(error = %e, "Redis peek failed, using in-memory state");
                self.inner.peek(key, tier).await
            }
        }
    }

    async fn reset(&self, key: &str, tier: Tier) {
        self.inner.reset(key, tier).await;

        if let Some(connection) = &self.connection {
            let mut conn = connection.clone();
            let redis_key = self.redis_key(key, tier);
            let outcome = timeout(
                OP_TIMEOUT,
                redis::cmd("DEL").arg(&redis_key).query_async::<i64>(&mut conn),
            )
            .await;
            if let Ok(Err(e)) = outcome {
                warn!(key = %key, error = %e, "Failed to reset distributed rate limit key");
            }
        }
    }

    async fn reset_all(&self, tier: Option<Tier>) {
        self.inner.reset_all(tier).await;

        if let Some(connection) = &self.connection {
            if let Err(e) = self.distributed_clear(connection, tier).await {
                warn!(error = %e, "Failed to clear distributed rate limit keys");
            }
        }
    }

    async fn evict_idle(&self, max_age_secs: u64) -> usize {
        // Remote entries expire via their TTL; only the fallback needs a sweep
        self.inner.evict_idle(max_age_secs).await
    }

    async fn metrics(&self) -> RateLimiterMetrics {
        self.metrics.snapshot(&self.backend_name()).await
    }

    fn backend_name(&self) -> String {
        if self.is_degraded() {
            "redis (fallback to memory)".to_string()
        } else {
            "redis".to_string()
        }
    }
}
