//! Presentation Layer - HTTP surface
//!
//! Middleware, route wiring, and the request/response models exposed to
//! clients.

pub mod middleware;
pub mod models;
pub mod routes;

pub use middleware::{
    RateLimitState, RequestIdentity, identity_middleware, rate_limit_info_middleware,
    rate_limit_middleware,
};
pub use models::*;
pub use routes::create_router;
