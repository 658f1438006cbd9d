//! Backend factory and background maintenance
//!
//! Constructs the configured rate limiter implementation and wires the
//! idle-bucket sweeper. Invoked once at startup by the composition layer;
//! the rest of the application only sees `Arc<dyn RateLimiterService>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{RateLimitBackend, RateLimitSettings, TierSettings};

use super::redis_backend::RedisRateLimiter;
use super::service::{
    DEFAULT_AUTH_MAX_REQUESTS, DEFAULT_AUTH_WINDOW_SECONDS, DEFAULT_ENDPOINT_MAX_REQUESTS,
    DEFAULT_ENDPOINT_WINDOW_SECONDS, DEFAULT_GLOBAL_MAX_REQUESTS, DEFAULT_GLOBAL_WINDOW_SECONDS,
    DEFAULT_USER_MAX_REQUESTS, DEFAULT_USER_WINDOW_SECONDS, MemoryRateLimiter, RateLimiterService,
};
use super::types::{Tier, TierConfig};

fn resolve_tier(settings: &TierSettings, default_max: u32, default_window: u64) -> TierConfig {
    let max_requests = settings.max_requests.unwrap_or(default_max);
    let window_seconds = settings.window_seconds.unwrap_or(default_window);
    let config = TierConfig::new(max_requests, window_seconds);
    match settings.refill_rate {
        Some(rate) => config.with_refill_rate(rate),
        None => config,
    }
}

/// Tier configs from settings, with the built-in defaults filling any gaps
pub fn tier_configs(settings: &RateLimitSettings) -> HashMap<Tier, TierConfig> {
    HashMap::from([
        (
            Tier::Global,
            resolve_tier(
                &settings.global,
                DEFAULT_GLOBAL_MAX_REQUESTS,
                DEFAULT_GLOBAL_WINDOW_SECONDS,
            ),
        ),
        (
            Tier::Auth,
            resolve_tier(
                &settings.auth,
                DEFAULT_AUTH_MAX_REQUESTS,
                DEFAULT_AUTH_WINDOW_SECONDS,
            ),
        ),
        (
            Tier::User,
            resolve_tier(
                &settings.user,
                DEFAULT_USER_MAX_REQUESTS,
                DEFAULT_USER_WINDOW_SECONDS,
            ),
        ),
        (
            Tier::Endpoint,
            resolve_tier(
                &settings.endpoint,
                DEFAULT_ENDPOINT_MAX_REQUESTS,
                DEFAULT_ENDPOINT_WINDOW_SECONDS,
            ),
        ),
    ])
}

/// Construct the configured backend.
///
/// Construction never fails: the redis variant starts degraded and serves
/// from its in-memory fallback when the connection probe does not succeed.
pub async fn build_rate_limiter(settings: &RateLimitSettings) -> Arc<dyn RateLimiterService> {
    let tiers = tier_configs(settings);

    match settings.backend {
        RateLimitBackend::Memory => {
            info!("Rate limiter using in-memory backend");
            Arc::new(MemoryRateLimiter::new(tiers))
        }
        RateLimitBackend::Redis => {
            let limiter = RedisRateLimiter::connect(&settings.redis_url, tiers).await;
            info!(backend = %limiter.backend_name(), "Rate limiter backend selected");
            Arc::new(limiter)
        }
    }
}

/// Periodically evict idle buckets until the token is cancelled.
///
/// The sweep exists purely for memory reclamation; refill correctness never
/// depends on it.
pub fn spawn_eviction_task(
    service: Arc<dyn RateLimiterService>,
    sweep_interval: Duration,
    max_age_secs: u64,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        // interval fires immediately; skip the startup tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = service.evict_idle(max_age_secs).await;
                    if evicted > 0 {
                        debug!(evicted = evicted, "Idle bucket sweep completed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Rate limiter eviction task shutting down");
                    return;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_configs_use_defaults_when_unset() {
        let settings = RateLimitSettings::default();
        let tiers = tier_configs(&settings);

        assert_eq!(tiers[&Tier::Global].max_requests, 1000);
        assert_eq!(tiers[&Tier::Global].window_seconds, 60);
        assert_eq!(tiers[&Tier::Auth].max_requests, 5);
        assert_eq!(tiers[&Tier::Auth].window_seconds, 900);
        assert_eq!(tiers[&Tier::User].max_requests, 100);
        assert_eq!(tiers[&Tier::Endpoint].max_requests, 1000);
    }

    #[test]
    fn test_tier_configs_apply_partial_overrides() {
        let settings = RateLimitSettings {
            auth: TierSettings {
                max_requests: Some(10),
                ..TierSettings::default()
            },
            ..RateLimitSettings::default()
        };
        let tiers = tier_configs(&settings);

        // Overridden ceiling, default window, re-derived rate
        let auth = &tiers[&Tier::Auth];
        assert_eq!(auth.max_requests, 10);
        assert_eq!(auth.window_seconds, 900);
        assert!((auth.refill_rate - 10.0 / 900.0).abs() < 1e-12);
    }

    #[test]
    fn test_tier_configs_honor_refill_override() {
        let settings = RateLimitSettings {
            global: TierSettings {
                refill_rate: Some(2.5),
                ..TierSettings::default()
            },
            ..RateLimitSettings::default()
        };
        let tiers = tier_configs(&settings);
        assert!((tiers[&Tier::Global].refill_rate - 2.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_memory_backend_selected_by_default() {
        let service = build_rate_limiter(&RateLimitSettings::default()).await;
        assert_eq!(service.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_redis_backend_degrades_when_unreachable() {
        let settings = RateLimitSettings {
            backend: RateLimitBackend::Redis,
            redis_url: "redis://127.0.0.1:9".to_string(),
            ..RateLimitSettings::default()
        };
        let service = build_rate_limiter(&settings).await;
        assert_eq!(service.backend_name(), "redis (fallback to memory)");

        // Degraded service still limits
        let result = service.check_limit("k", Tier::Global).await.unwrap();
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn test_eviction_task_stops_on_cancel() {
        let service = build_rate_limiter(&RateLimitSettings::default()).await;
        let token = CancellationToken::new();

        spawn_eviction_task(service, Duration::from_millis(10), 3600, token.clone());
        token.cancel();

        // Give the task a beat to observe the cancellation
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
}
