//! Tiered rate limiting middleware
//!
//! Wires the [`RateLimiterService`] into the request lifecycle: bypass
//! checks, key derivation, token consumption, quota headers, and 429
//! rejection with tier-specific messaging.
//!
//! Failure policy: every internal limiter error maps to an allow decision at
//! exactly one call site in [`rate_limit_middleware`]. The only user-visible
//! rejection this layer ever produces is a genuine 429.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use crate::infrastructure::rate_limiter::{
    IpAllowlist, RateLimitResult, RateLimiterService, Tier,
};
use crate::presentation::middleware::identity::RequestIdentity;
use crate::presentation::models::RateLimitExceededBody;

/// Derives the rate-limit key for a request
pub type KeyGenerator = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Returns true when a request should bypass rate limiting entirely
pub type SkipPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Invoked on every rejection, before the 429 is built
pub type LimitReachedHook = Arc<dyn Fn(&Request, &RateLimitResult) + Send + Sync>;

/// Per-layer tuning knobs
#[derive(Clone)]
pub struct RateLimitOptions {
    pub tier: Tier,
    pub key_generator: Option<KeyGenerator>,
    pub skip: Option<SkipPredicate>,
    pub on_limit_reached: Option<LimitReachedHook>,
}

impl RateLimitOptions {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            key_generator: None,
            skip: None,
            on_limit_reached: None,
        }
    }
}

/// Shared state for rate limiting middleware layers
#[derive(Clone)]
pub struct RateLimitState {
    pub service: Arc<dyn RateLimiterService>,
    pub allowlist: Arc<IpAllowlist>,
    pub enabled: bool,
    pub options: RateLimitOptions,
}

impl std::fmt::Debug for RateLimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitState")
            .field("tier", &self.options.tier)
            .field("enabled", &self.enabled)
            .field("backend", &self.service.backend_name())
            .finish()
    }
}

impl RateLimitState {
    pub fn new(
        service: Arc<dyn RateLimiterService>,
        allowlist: Arc<IpAllowlist>,
        enabled: bool,
        tier: Tier,
    ) -> Self {
        Self {
            service,
            allowlist,
            enabled,
            options: RateLimitOptions::new(tier),
        }
    }

    /// Per-IP limiting across all routes
    pub fn global(
        service: Arc<dyn RateLimiterService>,
        allowlist: Arc<IpAllowlist>,
        enabled: bool,
    ) -> Self {
        Self::new(service, allowlist, enabled, Tier::Global)
    }

    /// Strict per-IP limiting for login-type endpoints, with a security-event
    /// log entry on every rejection
    pub fn auth(
        service: Arc<dyn RateLimiterService>,
        allowlist: Arc<IpAllowlist>,
        enabled: bool,
    ) -> Self {
        Self::new(service, allowlist, enabled, Tier::Auth).with_limit_hook(Arc::new(
            |request: &Request, result: &RateLimitResult| {
                tracing::warn!(
                    target: "security",
                    ip = %extract_client_ip(request),
                    path = %request.uri().path(),
                    retry_after = ?result.retry_after,
                    "Repeated authentication attempts blocked"
                );
            },
        ))
    }

    /// Per-identity limiting; requests without a resolved identity are
    /// deferred to whatever limiting applies upstream
    pub fn user(
        service: Arc<dyn RateLimiterService>,
        allowlist: Arc<IpAllowlist>,
        enabled: bool,
    ) -> Self {
        Self::new(service, allowlist, enabled, Tier::User).with_skip(Arc::new(
            |request: &Request| request.extensions().get::<RequestIdentity>().is_none(),
        ))
    }

    /// Per-route limiting keyed by `<prefix>:<client ip>`
    pub fn endpoint(
        service: Arc<dyn RateLimiterService>,
        allowlist: Arc<IpAllowlist>,
        enabled: bool,
        prefix: &str,
    ) -> Self {
        let prefix = prefix.to_string();
        Self::new(service, allowlist, enabled, Tier::Endpoint).with_key_generator(Arc::new(
            move |request: &Request| format!("{}:{}", prefix, extract_client_ip(request)),
        ))
    }

    pub fn with_key_generator(mut self, generator: KeyGenerator) -> Self {
        self.options.key_generator = Some(generator);
        self
    }

    pub fn with_skip(mut self, skip: SkipPredicate) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn with_limit_hook(mut self, hook: LimitReachedHook) -> Self {
        self.options.on_limit_reached = Some(hook);
        self
    }
}

/// Skip predicate matching a fixed set of paths exactly
pub fn skip_paths(paths: &[&str]) -> SkipPredicate {
    let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
    Arc::new(move |request: &Request| {
        let path = request.uri().path();
        paths.iter().any(|p| p == path)
    })
}

/// Client IP resolution: `X-Forwarded-For` first entry, then `X-Real-IP`,
/// then the transport peer address, then `"unknown"`.
pub fn extract_client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Humanize a retry-after duration: `"N second(s)"` under a minute,
/// `"N minute(s)"` above, rounding minutes up.
pub fn humanize_retry_after(seconds: u64) -> String {
    if seconds < 60 {
        if seconds == 1 {
            "1 second".to_string()
        } else {
            format!("{} seconds", seconds)
        }
    } else {
        let minutes = seconds.div_ceil(60);
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{} minutes", minutes)
        }
    }
}

fn tier_message(tier: Tier, retry_after: u64) -> String {
    let wait = humanize_retry_after(retry_after);
    match tier {
        Tier::Auth => format!(
            "Too many authentication attempts. Please try again in {}. For security, we limit login attempts to prevent unauthorized access.",
            wait
        ),
        Tier::User => format!(
            "You've exceeded your rate limit. Please try again in {}. Consider upgrading for higher limits.",
            wait
        ),
        Tier::Endpoint => format!(
            "This endpoint has rate limits to ensure fair usage. Please try again in {}.",
            wait
        ),
        Tier::Global => format!(
            "Too many requests from your IP address. Please try again in {}.",
            wait
        ),
    }
}

fn derive_key(options: &RateLimitOptions, request: &Request) -> String {
    if let Some(generator) = &options.key_generator {
        return generator(request);
    }

    // The user tier keys by identity when one was resolved upstream
    if options.tier == Tier::User {
        if let Some(identity) = request.extensions().get::<RequestIdentity>() {
            return format!("user:{}", identity.user_id);
        }
    }

    format!("{}:{}", options.tier, extract_client_ip(request))
}

/// When limiter layers nest, the innermost decision's headers win; outer
/// layers only fill in headers that are still absent.
fn set_quota_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers
        .entry("x-ratelimit-limit")
        .or_insert(HeaderValue::from(result.limit));
    headers
        .entry("x-ratelimit-remaining")
        .or_insert(HeaderValue::from(result.remaining));
    headers
        .entry("x-ratelimit-reset")
        .or_insert(HeaderValue::from(result.reset_at));
}

/// Tiered rate limiting middleware.
///
/// Per-request order: skip predicate, allowlist, admin bypass, key
/// derivation, limit check. Quota headers are set on every limited response,
/// allowed or not.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    if let Some(skip) = &state.options.skip {
        if skip(&request) {
            return next.run(request).await;
        }
    }

    let client_ip = extract_client_ip(&request);
    if state.allowlist.contains(&client_ip) {
        tracing::debug!(ip = %client_ip, "Rate limit bypassed for allowlisted address");
        return next.run(request).await;
    }

    if let Some(identity) = request.extensions().get::<RequestIdentity>() {
        if identity.is_admin {
            tracing::debug!(user_id = %identity.user_id, "Rate limit bypassed for admin");
            return next.run(request).await;
        }
    }

    let tier = state.options.tier;
    let key = derive_key(&state.options, &request);

    // The single fail-open site: any limiter error becomes an allow.
    let result = match state.service.check_limit(&key, tier).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(
                key = %key,
                tier = %tier,
                error = %e,
                "Rate limiter failed, allowing request"
            );
            return next.run(request).await;
        }
    };

    if result.allowed {
        let mut response = next.run(request).await;
        set_quota_headers(response.headers_mut(), &result);
        return response;
    }

    let retry_after = result.retry_after.unwrap_or(60);

    if let Some(hook) = &state.options.on_limit_reached {
        hook(&request, &result);
    }

    tracing::warn!(
        key = %key,
        tier = %tier,
        path = %request.uri().path(),
        retry_after = retry_after,
        "Rate limit exceeded"
    );

    let body = RateLimitExceededBody {
        error: "Too Many Requests".to_string(),
        message: tier_message(tier, retry_after),
        retry_after,
        limit: result.limit,
        reset_time: result.reset_at,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    set_quota_headers(response.headers_mut(), &result);
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(retry_after));
    response
}

/// Passive variant: annotates responses with `X-RateLimit-Info-*` headers
/// without consuming tokens and without ever blocking. Useful for verifying
/// limiter behavior against live traffic before enforcement.
pub async fn rate_limit_info_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let tier = state.options.tier;
    let key = derive_key(&state.options, &request);
    let peeked = state.service.peek(&key, tier).await.ok();

    let mut response = next.run(request).await;

    if let Some(result) = peeked {
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-info-limit", HeaderValue::from(result.limit));
        headers.insert(
            "x-ratelimit-info-remaining",
            HeaderValue::from(result.remaining),
        );
        headers.insert("x-ratelimit-info-reset", HeaderValue::from(result.reset_at));
        headers.insert(
            "x-ratelimit-info-tier",
            HeaderValue::from_static(tier.as_str()),
        );
    }

    response
}
