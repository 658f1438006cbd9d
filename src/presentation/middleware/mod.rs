//! HTTP middleware for the web server

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

pub mod identity;
pub mod rate_limit;

pub use identity::{RequestIdentity, identity_middleware};
pub use rate_limit::{
    KeyGenerator, LimitReachedHook, RateLimitOptions, RateLimitState, SkipPredicate,
    extract_client_ip, humanize_retry_after, rate_limit_info_middleware, rate_limit_middleware,
    skip_paths,
};

/// Request logging middleware with timing and request ID
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = Uuid::new_v4();
    let start = Instant::now();

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "Processing request"
    );

    let response = next.run(request).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = start.elapsed().as_millis(),
        "Request completed"
    );

    response
}
