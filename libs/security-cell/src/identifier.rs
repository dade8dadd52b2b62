//! Stable client identifiers for rate-limit counters.

use axum::http::HeaderMap;

pub const UNKNOWN_CLIENT: &str = "unknown";

pub fn for_ip(ip: &str, route: &str) -> String {
    format!("ip:{}:{}", ip, route)
}

pub fn for_user(user_id: &str, route: &str) -> String {
    format!("user:{}:{}", user_id, route)
}

/// First hop of `x-forwarded-for`, then `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
}
