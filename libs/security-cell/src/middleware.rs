// =====================================================================================
// RATE LIMIT MIDDLEWARE
// =====================================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::identifier::{self, UNKNOWN_CLIENT};
use crate::models::{RateLimitError, RateLimitPreset};
use crate::services::RateLimiter;
use monitoring_cell::MetricsCollector;

/// Per-route limits plus the shared limiter. Install with
/// `middleware::from_fn_with_state(state, rate_limit_middleware)`.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    max_requests: u64,
    window_ms: u64,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, preset: RateLimitPreset) -> Self {
        Self::with_limits(limiter, preset.max_requests(), preset.window_ms())
    }

    pub fn with_limits(limiter: Arc<RateLimiter>, max_requests: u64, window_ms: u64) -> Self {
        Self {
            limiter,
            max_requests,
            window_ms,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let route = request.uri().path().to_string();
    let ip = identifier::client_ip(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    let client = identifier::for_ip(&ip, &route);

    let result = state
        .limiter
        .check(&client, state.max_requests, state.window_ms)
        .await;

    if !result.success {
        state.limiter.logger().log_rate_limit(&client, &route);
        if let Some(metrics) = &state.metrics {
            metrics.track_rate_limit_exceeded(&route).await;
        }
        return RateLimitError::Exceeded(result).into_response();
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(result.headers(Utc::now()));
    response
}
