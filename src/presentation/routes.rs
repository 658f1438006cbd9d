//! Route definitions and server wiring
//!
//! The demo surface exercises every rate limiting tier: a global layer
//! wrapping all routes, the auth layer on login, the user layer on account
//! routes, and the endpoint layer (plus passive info headers) on the product
//! listing. Admin endpoints expose limiter metrics and resets.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::config::RateLimitSettings;
use crate::infrastructure::rate_limiter::{
    IpAllowlist, RateLimiterMetrics, RateLimiterService,
};
use crate::presentation::middleware::{
    RateLimitState, RequestIdentity, identity_middleware, logging_middleware,
    rate_limit_info_middleware, rate_limit_middleware, skip_paths,
};
use crate::presentation::models::ResetRequest;

/// State shared by the admin endpoints
#[derive(Clone)]
pub struct AdminState {
    pub service: Arc<dyn RateLimiterService>,
}

/// Assemble the router with all rate limiting layers attached.
///
/// Middleware ordering matters: identity extraction must run before any
/// limiter so the user tier can key by identity and the admin bypass works.
pub fn create_router(
    service: Arc<dyn RateLimiterService>,
    allowlist: Arc<IpAllowlist>,
    settings: &RateLimitSettings,
) -> Router {
    let enabled = settings.enabled;

    let global_state = RateLimitState::global(service.clone(), allowlist.clone(), enabled)
        .with_skip(skip_paths(&["/health"]));
    let auth_state = RateLimitState::auth(service.clone(), allowlist.clone(), enabled);
    let user_state = RateLimitState::user(service.clone(), allowlist.clone(), enabled);
    let products_state =
        RateLimitState::endpoint(service.clone(), allowlist.clone(), enabled, "products");
    let products_info_state =
        RateLimitState::endpoint(service.clone(), allowlist.clone(), enabled, "products");

    let auth_routes = Router::new().route("/auth/login", post(login)).layer(
        middleware::from_fn_with_state(auth_state, rate_limit_middleware),
    );

    let account_routes = Router::new().route("/api/account", get(account)).layer(
        middleware::from_fn_with_state(user_state, rate_limit_middleware),
    );

    let product_routes = Router::new()
        .route("/api/products", get(list_products))
        .layer(middleware::from_fn_with_state(
            products_info_state,
            rate_limit_info_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            products_state,
            rate_limit_middleware,
        ));

    let admin_routes = Router::new()
        .route("/admin/rate-limit/metrics", get(rate_limit_metrics))
        .route("/admin/rate-limit/reset", post(rate_limit_reset))
        .with_state(AdminState { service });

    Router::new()
        .route("/health", get(health))
        .merge(auth_routes)
        .merge(account_routes)
        .merge(product_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            global_state,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(identity_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn list_products() -> Json<serde_json::Value> {
    Json(json!({
        "products": [
            { "id": 1, "name": "Standard Plan", "price_cents": 900 },
            { "id": 2, "name": "Pro Plan", "price_cents": 2900 },
        ]
    }))
}

/// Credential validation lives upstream of this demo; the route exists to
/// carry the auth-tier limiter.
async fn login() -> Json<serde_json::Value> {
    Json(json!({ "status": "accepted" }))
}

async fn account(identity: Option<Extension<RequestIdentity>>) -> Json<serde_json::Value> {
    match identity {
        Some(Extension(identity)) => Json(json!({
            "user_id": identity.user_id.to_string(),
            "is_admin": identity.is_admin,
        })),
        None => Json(json!({ "user_id": null })),
    }
}

async fn rate_limit_metrics(State(state): State<AdminState>) -> Json<RateLimiterMetrics> {
    Json(state.service.metrics().await)
}

async fn rate_limit_reset(
    State(state): State<AdminState>,
    Json(body): Json<ResetRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match (body.key, body.tier) {
        (Some(key), Some(tier)) => {
            state.service.reset(&key, tier).await;
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        (Some(_), None) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "resetting a single key requires a tier" })),
        ),
        (None, tier) => {
            state.service.reset_all(tier).await;
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
    }
}
