// =====================================================================================
// SECURITY CELL MODELS
// =====================================================================================

use std::fmt;
use std::str::FromStr;

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =====================================================================================
// RATE LIMIT OUTCOME
// =====================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub success: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_time: DateTime<Utc>,
}

impl RateLimitResult {
    /// Whole seconds until the window resets, never less than one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }

    pub fn headers(&self, now: DateTime<Utc>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert_numeric(&mut headers, HeaderName::from_static(X_RATELIMIT_LIMIT), self.limit);
        insert_numeric(
            &mut headers,
            HeaderName::from_static(X_RATELIMIT_REMAINING),
            self.remaining,
        );
        insert_numeric(
            &mut headers,
            HeaderName::from_static(X_RATELIMIT_RESET),
            self.reset_time.timestamp().max(0) as u64,
        );
        if !self.success {
            insert_numeric(&mut headers, RETRY_AFTER, self.retry_after_secs(now));
        }
        headers
    }
}

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

fn insert_numeric(headers: &mut HeaderMap, name: HeaderName, value: u64) {
    headers.insert(name, HeaderValue::from(value));
}

// =====================================================================================
// DEGRADE POLICY
// =====================================================================================

/// What the limiter does while the cache backend cannot count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradePolicy {
    /// Admit every request and warn that limiting is off.
    #[default]
    FailOpen,
    /// Reject every request until the cache is back.
    FailClosed,
    /// Count in process memory instead. Limits become per-instance.
    InMemory,
}

impl DegradePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradePolicy::FailOpen => "fail-open",
            DegradePolicy::FailClosed => "fail-closed",
            DegradePolicy::InMemory => "in-memory",
        }
    }
}

impl fmt::Display for DegradePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DegradePolicy {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-open" | "open" => Ok(DegradePolicy::FailOpen),
            "fail-closed" | "closed" => Ok(DegradePolicy::FailClosed),
            "in-memory" | "memory" => Ok(DegradePolicy::InMemory),
            _ => Err(RateLimitError::InvalidPolicy(s.to_string())),
        }
    }
}

// =====================================================================================
// PRESETS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPreset {
    Api,
    Auth,
    Booking,
    Review,
    Message,
}

impl RateLimitPreset {
    pub fn max_requests(&self) -> u64 {
        match self {
            RateLimitPreset::Api => 100,
            RateLimitPreset::Auth => 5,
            RateLimitPreset::Booking => 10,
            RateLimitPreset::Review => 5,
            RateLimitPreset::Message => 30,
        }
    }

    pub fn window_ms(&self) -> u64 {
        match self {
            RateLimitPreset::Api | RateLimitPreset::Booking | RateLimitPreset::Message => 60_000,
            RateLimitPreset::Auth => 15 * 60_000,
            RateLimitPreset::Review => 60 * 60_000,
        }
    }
}

// =====================================================================================
// ERRORS
// =====================================================================================

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Unknown rate limit degrade policy: {0}")]
    InvalidPolicy(String),
    #[error("Rate limit exceeded")]
    Exceeded(RateLimitResult),
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let now = Utc::now();
        match self {
            RateLimitError::Exceeded(result) => {
                let retry_after = result.retry_after_secs(now);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    result.headers(now),
                    Json(serde_json::json!({
                        "error": "Too many requests",
                        "retry_after": retry_after,
                        "timestamp": now
                    })),
                )
                    .into_response()
            }
            RateLimitError::InvalidPolicy(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Rate limiter misconfigured",
                    "timestamp": now
                })),
            )
                .into_response(),
        }
    }
}
