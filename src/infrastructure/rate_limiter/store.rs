//! Token bucket store
//!
//! One bucket per (key, tier) pair behind a single `RwLock`. Every check is
//! a refill-then-consume critical section under the write lock, so two
//! concurrent callers can never both win the last token. Coarse locking is
//! deliberate: bucket operations are a few float ops, far cheaper than the
//! lock handoff itself at the request rates this serves.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use super::types::{RateLimitResult, Tier, TierConfig, TokenBucket, current_time_millis};

/// Per-(key, tier) token buckets with lazy refill and idle eviction
pub struct TokenBucketStore {
    buckets: RwLock<HashMap<(Tier, String), TokenBucket>>,
}

impl TokenBucketStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Refill and attempt to consume one token for the key.
    ///
    /// Creates the bucket at full capacity on first sight, so the first
    /// request for a key always succeeds.
    pub async fn check(&self, key: &str, tier: Tier, config: &TierConfig) -> RateLimitResult {
        let now = current_time_millis();
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry((tier, key.to_string()))
            .or_insert_with(|| TokenBucket::new(config));

        bucket.refill(now);
        if bucket.try_consume() {
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
        }
    }

    /// Report the current state for a key without consuming a token.
    /// A key with no bucket reports full capacity.
    pub async fn peek(&self, key: &str, tier: Tier, config: &TierConfig) -> RateLimitResult {
        let now = current_time_millis();
        let buckets = self.buckets.read().await;
        match buckets.get(&(tier, key.to_string())) {
            Some(bucket) => {
                // Refill a copy; peeking must not advance the stored clock
                let mut projected = bucket.clone();
                projected.refill(now);
                RateLimitResult::allowed(
                    config.max_requests,
                    projected.remaining(),
                    projected.reset_at(config.window_seconds),
                    tier,
                )
            }
            None => RateLimitResult::allowed(
                config.max_requests,
                config.max_requests,
                now / 1000 + config.window_seconds,
                tier,
            ),
        }
    }

    /// Drop the bucket for a key; the next check sees full capacity
    pub async fn remove(&self, key: &str, tier: Tier) -> bool {
        let mut buckets = self.buckets.write().await;
        buckets.remove(&(tier, key.to_string())).is_some()
    }

    /// Drop every bucket in one tier, or all buckets
    pub async fn clear(&self, tier: Option<Tier>) {
        let mut buckets = self.buckets.write().await;
        match tier {
            Some(tier) => buckets.retain(|(bucket_tier, _), _| *bucket_tier != tier),
            None => buckets.clear(),
        }
    }

    /// Remove buckets whose last refill is older than `max_age_secs`.
    ///
    /// Two-phase: candidates are collected under the read lock, then removed
    /// under a short write acquisition with a staleness re-check, so a full
    /// scan never stalls concurrent checks. Returns the evicted count.
    pub async fn evict_idle(&self, max_age_secs: u64) -> usize {
        let now = current_time_millis();
        let cutoff_ms = max_age_secs.saturating_mul(1000);

        let stale: Vec<(Tier, String)> = {
            let buckets = self.buckets.read().await;
            buckets
                .iter()
                .filter(|(_, bucket)| now.saturating_sub(bucket.last_refill_ms) > cutoff_ms)
                .map(|(key, _)| key.clone())
                .collect()
        };

        if stale.is_empty() {
            return 0;
        }

        let mut evicted = 0;
        let mut buckets = self.buckets.write().await;
        for key in stale {
            // A check may have touched the bucket between the two phases
            if let Some(bucket) = buckets.get(&key) {
                if now.saturating_sub(bucket.last_refill_ms) > cutoff_ms {
                    buckets.remove(&key);
                    evicted += 1;
                }
            }
        }
        drop(buckets);

        debug!(evicted = evicted, "Evicted idle rate limit buckets");
        evicted
    }

    /// Number of live buckets across all tiers
    pub async fn len(&self) -> usize {
        self.buckets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buckets.read().await.is_empty()
    }

    /// Whether a bucket currently exists for the key
    pub async fn contains(&self, key: &str, tier: Tier) -> bool {
        self.buckets
            .read()
            .await
            .contains_key(&(tier, key.to_string()))
    }

    /// Rewind a bucket's refill clock; test hook for aging buckets quickly
    #[cfg(test)]
    pub async fn age_bucket(&self, key: &str, tier: Tier, by_ms: u64) {
        let mut buckets = self.buckets.write().await;
        if let Some(bucket) = buckets.get_mut(&(tier, key.to_string())) {
            bucket.last_refill_ms = bucket.last_refill_ms.saturating_sub(by_ms);
        }
    }
}

impl Default for TokenBucketStore {
    fn default() -> Self {
        Self::new()
    }
}
