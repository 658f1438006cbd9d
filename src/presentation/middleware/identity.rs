//! Identity extraction middleware
//!
//! Resolves caller identity BEFORE rate limiting so the limiter can key the
//! user tier by identity and honor the admin bypass. The limiter itself never
//! authenticates; it trusts whatever this layer attached to the request.

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

/// Identity resolved by upstream authentication, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub user_id: Uuid,
    pub is_admin: bool,
}

/// Header-based identity middleware.
///
/// Reads `X-User-Id` (UUID) and `X-Admin` (`true`) and attaches a
/// [`RequestIdentity`] extension when a valid user id is present. A real
/// deployment replaces this with session or token validation; the rate
/// limiting layers only depend on the extension, not on how it was produced.
pub async fn identity_middleware(mut request: Request, next: Next) -> Response {
    let user_id = request
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok());

    if let Some(user_id) = user_id {
        let is_admin = request
            .headers()
            .get("x-admin")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        request
            .extensions_mut()
            .insert(RequestIdentity { user_id, is_admin });
    }

    next.run(request).await
}
