//! API request and response models

use serde::{Deserialize, Serialize};

use crate::infrastructure::rate_limiter::Tier;

/// Body returned with every 429 rejection.
///
/// Field names are part of the public API; clients parse them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitExceededBody {
    /// Always "Too Many Requests"
    pub error: String,

    /// Tier-specific human-readable guidance
    pub message: String,

    /// Seconds until a token is available again
    pub retry_after: u64,

    /// Bucket capacity for the tier that rejected the request
    pub limit: u32,

    /// Unix seconds estimate of when the bucket refills completely
    pub reset_time: u64,
}

/// Request model for the admin reset endpoint.
///
/// `key` and `tier` together reset one bucket; `tier` alone clears that
/// tier across all keys; an empty body clears the entire store.
#[derive(Debug, Clone, Deserialize)]
pub struct ResetRequest {
    pub key: Option<String>,
    pub tier: Option<Tier>,
}
