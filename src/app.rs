//! Application setup and wiring

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::infrastructure::rate_limiter::{IpAllowlist, build_rate_limiter, spawn_eviction_task};
use crate::presentation::routes::create_router;

/// Handle returned from create_app for graceful shutdown coordination
pub struct AppHandle {
    pub router: Router,
    pub shutdown_token: CancellationToken,
}

/// Create the application router and return an AppHandle for shutdown
/// coordination.
///
/// Construction cannot fail: an unreachable redis backend degrades to the
/// in-memory limiter rather than refusing to start. Environment and files
/// were already parsed into `config`; nothing below this point reads the
/// environment.
pub async fn create_app(config: AppConfig) -> AppHandle {
    let shutdown_token = CancellationToken::new();

    // Parsed once at startup; malformed entries are skipped with a warning
    let allowlist = Arc::new(IpAllowlist::parse(&config.rate_limit.allowlist));
    if !allowlist.is_empty() {
        tracing::info!(entries = allowlist.len(), "Rate limit allowlist active");
    }

    let rate_limiter = build_rate_limiter(&config.rate_limit).await;

    spawn_eviction_task(
        rate_limiter.clone(),
        Duration::from_secs(config.rate_limit.cleanup_interval_seconds),
        config.rate_limit.idle_max_age_seconds,
        shutdown_token.clone(),
    );

    let router = create_router(rate_limiter, allowlist, &config.rate_limit);

    AppHandle {
        router,
        shutdown_token,
    }
}
