// =====================================================================================
// RATE LIMIT MIDDLEWARE TESTS
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header::RETRY_AFTER, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use monitoring_cell::MetricsCollector;
use performance_cell::services::ReconnectPolicy;
use performance_cell::{CacheStore, MemoryBackend};
use security_cell::models::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET};
use security_cell::{
    rate_limit_middleware, DegradePolicy, RateLimitPreset, RateLimitState, RateLimiter,
};
use shared_config::Environment;
use shared_logging::{LogLevel, MemorySink, StructuredLogger};

struct TestApp {
    router: Router,
    metrics: Arc<MetricsCollector>,
    sink: Arc<MemorySink>,
}

async fn test_app(max_requests: u64) -> TestApp {
    let sink = Arc::new(MemorySink::new());
    let logger = Arc::new(StructuredLogger::with_sink(
        LogLevel::Debug,
        Environment::Test,
        sink.clone(),
    ));
    let cache = CacheStore::with_backend(
        Arc::new(MemoryBackend::new()),
        ReconnectPolicy::default(),
        logger.clone(),
    );
    assert!(cache.initialize().await);

    let limiter = Arc::new(RateLimiter::with_policy(cache, DegradePolicy::FailOpen, logger.clone()));
    let metrics = Arc::new(MetricsCollector::with_interval(Duration::from_secs(60), logger));
    let state = RateLimitState::with_limits(limiter, max_requests, 60_000).with_metrics(metrics.clone());

    let router = Router::new()
        .route("/api/bookings", get(|| async { "booked" }))
        .route("/api/reviews", get(|| async { "reviewed" }))
        .layer(middleware::from_fn_with_state(state, rate_limit_middleware));

    TestApp {
        router,
        metrics,
        sink,
    }
}

async fn request(router: &Router, uri: &str, ip: Option<&str>) -> Response {
    let mut builder = Request::builder().uri(uri);
    if let Some(ip) = ip {
        builder = builder.header("x-forwarded-for", ip);
    }
    router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn header_u64(response: &Response, name: &str) -> u64 {
    response.headers()[name].to_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_allowed_requests_carry_limit_headers() {
    let app = test_app(3).await;

    let first = request(&app.router, "/api/bookings", Some("203.0.113.7")).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_u64(&first, X_RATELIMIT_LIMIT), 3);
    assert_eq!(header_u64(&first, X_RATELIMIT_REMAINING), 2);
    assert!(header_u64(&first, X_RATELIMIT_RESET) > 0);
    assert!(first.headers().get(RETRY_AFTER).is_none());

    let body = to_bytes(first.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"booked");

    let second = request(&app.router, "/api/bookings", Some("203.0.113.7")).await;
    assert_eq!(header_u64(&second, X_RATELIMIT_REMAINING), 1);
}

#[tokio::test]
async fn test_exceeding_limit_returns_429() {
    let app = test_app(2).await;

    request(&app.router, "/api/bookings", Some("203.0.113.7")).await;
    request(&app.router, "/api/bookings", Some("203.0.113.7")).await;
    let rejected = request(&app.router, "/api/bookings", Some("203.0.113.7")).await;

    assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_u64(&rejected, X_RATELIMIT_REMAINING), 0);
    let retry_after = header_u64(&rejected, RETRY_AFTER.as_str());
    assert!((1..=60).contains(&retry_after));

    let bytes = to_bytes(rejected.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "Too many requests");
    assert_eq!(body["retry_after"], retry_after);
    assert!(body["timestamp"].is_string());

    assert!(app.sink.contains(LogLevel::Warn, "Rate limit exceeded"));
}

#[tokio::test]
async fn test_rejection_is_recorded_as_metric() {
    let app = test_app(1).await;

    request(&app.router, "/api/reviews", Some("198.51.100.4")).await;
    request(&app.router, "/api/reviews", Some("198.51.100.4")).await;
    request(&app.router, "/api/reviews", Some("198.51.100.4")).await;

    let summary = app.metrics.get_summary().await;
    assert_eq!(summary["ratelimit.exceeded"].count, 2);
}

#[tokio::test]
async fn test_clients_and_routes_have_separate_windows() {
    let app = test_app(1).await;

    let first = request(&app.router, "/api/bookings", Some("203.0.113.7, 10.0.0.1")).await;
    let other_client = request(&app.router, "/api/bookings", Some("203.0.113.8")).await;
    let other_route = request(&app.router, "/api/reviews", Some("203.0.113.7")).await;
    let repeat = request(&app.router, "/api/bookings", Some("203.0.113.7")).await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(other_client.status(), StatusCode::OK);
    assert_eq!(other_route.status(), StatusCode::OK);
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_requests_without_client_address_share_a_bucket() {
    let app = test_app(1).await;

    assert_eq!(request(&app.router, "/api/bookings", None).await.status(), StatusCode::OK);
    assert_eq!(
        request(&app.router, "/api/bookings", None).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_preset_state_uses_preset_limits() {
    let sink = Arc::new(MemorySink::new());
    let logger = Arc::new(StructuredLogger::with_sink(LogLevel::Debug, Environment::Test, sink));
    let cache = CacheStore::with_backend(
        Arc::new(MemoryBackend::new()),
        ReconnectPolicy::default(),
        logger.clone(),
    );
    cache.initialize().await;
    let limiter = Arc::new(RateLimiter::with_policy(cache, DegradePolicy::FailOpen, logger));

    let router = Router::new()
        .route("/api/auth/login", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(
            RateLimitState::new(limiter, RateLimitPreset::Auth),
            rate_limit_middleware,
        ));

    let response = request(&router, "/api/auth/login", Some("192.0.2.1")).await;
    assert_eq!(header_u64(&response, X_RATELIMIT_LIMIT), 5);
    assert_eq!(header_u64(&response, X_RATELIMIT_REMAINING), 4);
}
