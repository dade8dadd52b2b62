// =====================================================================================
// RATE LIMITER TESTS
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;

use performance_cell::services::{CacheBackend, ReconnectPolicy};
use performance_cell::{CacheStore, MemoryBackend};
use security_cell::services::rate_limiter::MAX_WINDOW_MS;
use security_cell::{DegradePolicy, RateLimitError, RateLimitPreset, RateLimiter};
use shared_config::{AppConfig, Environment};
use shared_logging::{LogLevel, MemorySink, StructuredLogger};

fn test_logger() -> (Arc<StructuredLogger>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let logger = StructuredLogger::with_sink(LogLevel::Debug, Environment::Test, sink.clone());
    (Arc::new(logger), sink)
}

async fn limiter_on_memory(
    policy: DegradePolicy,
) -> (RateLimiter, Arc<MemoryBackend>, Arc<MemorySink>) {
    let (logger, sink) = test_logger();
    let backend = Arc::new(MemoryBackend::new());
    let cache = CacheStore::with_backend(backend.clone(), ReconnectPolicy::default(), logger.clone());
    assert!(cache.initialize().await);
    (RateLimiter::with_policy(cache, policy, logger), backend, sink)
}

fn limiter_without_cache(policy: DegradePolicy) -> (RateLimiter, Arc<MemorySink>) {
    let (logger, sink) = test_logger();
    let cache = CacheStore::disabled(logger.clone());
    (RateLimiter::with_policy(cache, policy, logger), sink)
}

// =====================================================================================
// FIXED WINDOW
// =====================================================================================

#[tokio::test(start_paused = true)]
async fn test_fixed_window_counts_down_then_resets() {
    let (limiter, _, _) = limiter_on_memory(DegradePolicy::FailOpen).await;

    for expected_remaining in [4, 3, 2, 1, 0] {
        let result = limiter.check("ip:1.2.3.4:/api/search", 5, 1_000).await;
        assert!(result.success);
        assert_eq!(result.limit, 5);
        assert_eq!(result.remaining, expected_remaining);
    }

    let blocked = limiter.check("ip:1.2.3.4:/api/search", 5, 1_000).await;
    assert!(!blocked.success);
    assert_eq!(blocked.remaining, 0);
    assert!(blocked.reset_time > Utc::now());

    tokio::time::advance(Duration::from_millis(1_000)).await;

    let fresh = limiter.check("ip:1.2.3.4:/api/search", 5, 1_000).await;
    assert!(fresh.success);
    assert_eq!(fresh.remaining, 4);
}

#[tokio::test(start_paused = true)]
async fn test_window_starts_with_first_request_and_never_extends() {
    let (limiter, _, _) = limiter_on_memory(DegradePolicy::FailOpen).await;

    limiter.check("user:u1:/api/reviews", 3, 1_000).await;
    tokio::time::advance(Duration::from_millis(600)).await;
    let second = limiter.check("user:u1:/api/reviews", 3, 1_000).await;
    assert_eq!(second.remaining, 1);

    tokio::time::advance(Duration::from_millis(400)).await;

    let after_window = limiter.check("user:u1:/api/reviews", 3, 1_000).await;
    assert_eq!(after_window.remaining, 2);
}

#[tokio::test]
async fn test_identifiers_are_counted_independently() {
    let (limiter, _, _) = limiter_on_memory(DegradePolicy::FailOpen).await;

    assert!(limiter.check("ip:10.0.0.1:/api/bookings", 2, 60_000).await.success);
    assert!(limiter.check("ip:10.0.0.1:/api/bookings", 2, 60_000).await.success);
    assert!(!limiter.check("ip:10.0.0.1:/api/bookings", 2, 60_000).await.success);

    let other = limiter.check("ip:10.0.0.2:/api/bookings", 2, 60_000).await;
    assert!(other.success);
    assert_eq!(other.remaining, 1);
}

#[tokio::test]
async fn test_reset_time_tracks_counter_ttl() {
    let (limiter, _, _) = limiter_on_memory(DegradePolicy::FailOpen).await;

    let before = Utc::now();
    let result = limiter.check("ip:1.1.1.1:/api/auth/login", 5, 15 * 60_000).await;
    let until_reset = (result.reset_time - before).num_seconds();

    assert!((899..=901).contains(&until_reset));
}

#[tokio::test]
async fn test_oversized_window_is_clamped() {
    let (limiter, backend, _) = limiter_on_memory(DegradePolicy::FailOpen).await;

    let before = Utc::now();
    let result = limiter.check("ip:1.1.1.1:/api/export", 5, u64::MAX).await;

    assert!(result.success);
    assert_eq!(result.remaining, 4);
    assert!(result.reset_time > before);
    let max_seconds = (MAX_WINDOW_MS / 1_000) as i64;
    assert!((result.reset_time - before).num_seconds() <= max_seconds + 1);

    let ttl = backend.ttl("ratelimit:ip:1.1.1.1:/api/export").await.unwrap();
    assert!(ttl > 0 && ttl <= max_seconds);
}

#[tokio::test]
async fn test_oversized_window_in_degraded_modes() {
    for policy in [DegradePolicy::FailOpen, DegradePolicy::FailClosed, DegradePolicy::InMemory] {
        let (limiter, _) = limiter_without_cache(policy);
        let result = limiter.check("ip:9.9.9.9:/api/export", 5, u64::MAX).await;
        assert!(result.reset_time > Utc::now());
    }

    let (limiter, _, _) = limiter_on_memory(DegradePolicy::FailOpen).await;
    let limiter = limiter.with_defaults(3, u64::MAX);
    assert_eq!(limiter.check_default("ip:1.1.1.1:/api/x").await.remaining, 2);
}

#[tokio::test]
async fn test_presets_and_defaults() {
    let (limiter, _, _) = limiter_on_memory(DegradePolicy::FailOpen).await;

    let auth = limiter
        .check_preset("ip:1.1.1.1:/api/auth/login", RateLimitPreset::Auth)
        .await;
    assert_eq!(auth.limit, 5);
    assert_eq!(auth.remaining, 4);

    let api = limiter.check_default("ip:1.1.1.1:/api/properties").await;
    assert_eq!(api.limit, 100);

    let (limiter, _, _) = limiter_on_memory(DegradePolicy::FailOpen).await;
    let limiter = limiter.with_defaults(7, 30_000);
    assert_eq!(limiter.check_default("ip:1.1.1.1:/api/x").await.remaining, 6);
}

// =====================================================================================
// DEGRADED CACHE
// =====================================================================================

#[tokio::test]
async fn test_fail_open_admits_everything_and_warns_once() {
    let (limiter, sink) = limiter_without_cache(DegradePolicy::FailOpen);

    for _ in 0..5 {
        let result = limiter.check("ip:9.9.9.9:/api/bookings", 2, 60_000).await;
        assert!(result.success);
        assert_eq!(result.remaining, 2);
    }

    assert!(limiter.is_degraded());
    let warnings = sink.entries_at(LogLevel::Warn);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("Rate limiting disabled"));
}

#[tokio::test]
async fn test_fail_closed_rejects_everything() {
    let (limiter, sink) = limiter_without_cache(DegradePolicy::FailClosed);

    let result = limiter.check("ip:9.9.9.9:/api/bookings", 10, 60_000).await;

    assert!(!result.success);
    assert_eq!(result.remaining, 0);
    assert!(sink.contains(LogLevel::Warn, "failing closed"));
}

#[tokio::test(start_paused = true)]
async fn test_in_memory_policy_keeps_limiting() {
    let (limiter, sink) = limiter_without_cache(DegradePolicy::InMemory);

    assert!(limiter.check("ip:9.9.9.9:/api/bookings", 2, 60_000).await.success);
    assert!(limiter.check("ip:9.9.9.9:/api/bookings", 2, 60_000).await.success);
    assert!(!limiter.check("ip:9.9.9.9:/api/bookings", 2, 60_000).await.success);
    assert!(sink.contains(LogLevel::Warn, "in-memory counters"));

    tokio::time::advance(Duration::from_secs(60)).await;

    assert!(limiter.check("ip:9.9.9.9:/api/bookings", 2, 60_000).await.success);
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(limiter.sweep_fallback(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_limiting_resumes_when_cache_recovers() {
    let (limiter, backend, sink) = limiter_on_memory(DegradePolicy::FailOpen).await;

    assert!(limiter.check("ip:5.5.5.5:/api/search", 1, 60_000).await.success);

    backend.set_online(false);
    let during_outage = limiter.check("ip:5.5.5.5:/api/search", 1, 60_000).await;
    assert!(during_outage.success);
    assert!(limiter.is_degraded());

    backend.set_online(true);
    tokio::time::sleep(Duration::from_secs(5)).await;

    let recovered = limiter.check("ip:5.5.5.5:/api/search", 1, 60_000).await;
    assert!(!recovered.success);
    assert!(!limiter.is_degraded());
    assert!(sink.contains(LogLevel::Info, "Rate limiting restored"));
}

// =====================================================================================
// CONFIGURATION
// =====================================================================================

#[test]
fn test_configured_policy_and_limits() {
    let (logger, _) = test_logger();
    let config = AppConfig {
        rate_limit_max_requests: 50,
        rate_limit_window_ms: 30_000,
        rate_limit_degrade_policy: "in_memory".to_string(),
        ..AppConfig::default()
    };

    let limiter = RateLimiter::new(&config, CacheStore::disabled(logger.clone()), logger).unwrap();

    assert_eq!(limiter.policy(), DegradePolicy::InMemory);
}

#[test]
fn test_unknown_policy_is_rejected() {
    let (logger, _) = test_logger();
    let config = AppConfig {
        rate_limit_degrade_policy: "whenever".to_string(),
        ..AppConfig::default()
    };

    let result = RateLimiter::new(&config, CacheStore::disabled(logger.clone()), logger);

    assert_matches!(result, Err(RateLimitError::InvalidPolicy(policy)) if policy == "whenever");
}
