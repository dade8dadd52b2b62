// =====================================================================================
// CACHE STORE INTEGRATION TESTS
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use performance_cell::services::{CacheBackend, ReconnectPolicy};
use performance_cell::{
    CacheError, CacheKeys, CacheStore, CacheTtl, ConnectionState, MemoryBackend,
};
use shared_config::{AppConfig, Environment};
use shared_logging::{LogLevel, MemorySink, StructuredLogger};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Property {
    id: String,
    title: String,
    rent: u32,
}

fn sample_property(id: &str) -> Property {
    Property {
        id: id.to_string(),
        title: "Sunny PG near campus".to_string(),
        rent: 8_500,
    }
}

fn test_logger() -> (Arc<StructuredLogger>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let logger = StructuredLogger::with_sink(LogLevel::Debug, Environment::Test, sink.clone());
    (Arc::new(logger), sink)
}

async fn connected_store() -> (CacheStore, Arc<MemoryBackend>, Arc<MemorySink>) {
    let backend = Arc::new(MemoryBackend::new());
    let (logger, sink) = test_logger();
    let store = CacheStore::with_backend(backend.clone(), ReconnectPolicy::default(), logger);
    assert!(store.initialize().await);
    (store, backend, sink)
}

// =====================================================================================
// BASIC OPERATIONS
// =====================================================================================

#[tokio::test]
async fn test_set_then_get_returns_value() {
    let (store, _, _) = connected_store().await;
    let property = sample_property("p1");

    assert!(store.set(&CacheKeys::property("p1"), &property, CacheTtl::PROPERTY).await);

    let cached: Option<Property> = store.get(&CacheKeys::property("p1")).await;
    assert_eq!(cached, Some(property));
    assert_eq!(store.status().hits, 1);
    assert_eq!(store.status().sets, 1);
}

#[tokio::test]
async fn test_get_miss_returns_none() {
    let (store, _, _) = connected_store().await;

    let cached: Option<Property> = store.get("property:missing").await;

    assert!(cached.is_none());
    assert_eq!(store.status().misses, 1);
}

#[tokio::test]
async fn test_corrupt_value_is_a_logged_miss() {
    let (store, backend, sink) = connected_store().await;
    backend.set_ex("property:bad", "{not json", 60).await.unwrap();

    let cached: Option<Property> = store.get("property:bad").await;

    assert!(cached.is_none());
    assert!(sink.contains(LogLevel::Warn, "could not be deserialized"));
    assert_eq!(store.status().misses, 1);
    assert_eq!(store.status().errors, 1);
}

#[tokio::test]
async fn test_delete_reports_whether_key_existed() {
    let (store, _, _) = connected_store().await;
    store.set("user:u1", &"profile", CacheTtl::USER).await;

    assert!(store.delete("user:u1").await);
    assert!(!store.delete("user:u1").await);
}

#[tokio::test]
async fn test_delete_pattern_counts_matches() {
    let (store, _, _) = connected_store().await;
    for variant in ["page1", "page2", "city-pune"] {
        store
            .set(&CacheKeys::property_list(variant), &vec!["p1"], CacheTtl::PROPERTY_LIST)
            .await;
    }
    store.set(&CacheKeys::property("p1"), &sample_property("p1"), 60).await;

    assert_eq!(store.delete_pattern("properties:list:*").await, 3);
    assert_eq!(store.delete_pattern("properties:list:*").await, 0);
    assert!(store.get::<Property>(&CacheKeys::property("p1")).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_ttl_reports_remaining_seconds_and_sentinels() {
    let (store, _, _) = connected_store().await;
    store.set("stats:dashboard", &42, CacheTtl::STATS).await;

    assert_eq!(store.get_ttl("stats:dashboard").await, 60);
    tokio::time::advance(Duration::from_millis(20_500)).await;
    assert_eq!(store.get_ttl("stats:dashboard").await, 40);
    assert_eq!(store.get_ttl("stats:missing").await, -2);

    tokio::time::advance(Duration::from_secs(41)).await;
    assert!(store.get::<i32>("stats:dashboard").await.is_none());
}

#[tokio::test]
async fn test_get_or_set_loads_once() {
    let (store, _, _) = connected_store().await;
    let key = CacheKeys::reviews("p1", "latest");

    let first: Result<Vec<String>, String> = store
        .get_or_set(&key, CacheTtl::REVIEWS, || async { Ok(vec!["great".to_string()]) })
        .await;
    let second: Result<Vec<String>, String> = store
        .get_or_set(&key, CacheTtl::REVIEWS, || async {
            Err("loader should not run on a hit".to_string())
        })
        .await;

    assert_eq!(first.unwrap(), vec!["great".to_string()]);
    assert_eq!(second.unwrap(), vec!["great".to_string()]);
}

#[tokio::test]
async fn test_get_or_set_propagates_loader_error() {
    let (store, _, _) = connected_store().await;

    let result: Result<u32, &str> = store
        .get_or_set("stats:broken", 60, || async { Err("database down") })
        .await;

    assert_matches!(result, Err("database down"));
    assert!(store.get::<u32>("stats:broken").await.is_none());
}

// =====================================================================================
// RATE-LIMIT COUNTERS
// =====================================================================================

#[tokio::test(start_paused = true)]
async fn test_first_increment_starts_the_window() {
    let (store, _, _) = connected_store().await;

    assert_eq!(store.increment_rate_limit("ip:10.0.0.1:/api/bookings", 1_500).await, 1);
    assert_eq!(store.increment_rate_limit("ip:10.0.0.1:/api/bookings", 1_500).await, 2);
    assert_eq!(store.get_rate_limit_count("ip:10.0.0.1:/api/bookings").await, 2);

    // 1500ms rounds up to a two second window
    assert_eq!(
        store.get_ttl(&CacheKeys::rate_limit("ip:10.0.0.1:/api/bookings")).await,
        2
    );

    tokio::time::advance(Duration::from_millis(2_001)).await;
    assert_eq!(store.get_rate_limit_count("ip:10.0.0.1:/api/bookings").await, 0);
    assert_eq!(store.increment_rate_limit("ip:10.0.0.1:/api/bookings", 1_500).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_later_increments_do_not_extend_the_window() {
    let (store, _, _) = connected_store().await;

    store.increment_rate_limit("user:u1:/api/reviews", 10_000).await;
    tokio::time::advance(Duration::from_secs(6)).await;
    store.increment_rate_limit("user:u1:/api/reviews", 10_000).await;

    assert_eq!(
        store.get_ttl(&CacheKeys::rate_limit("user:u1:/api/reviews")).await,
        4
    );
}

/// Memory backend whose EXPIRE always fails.
struct ExpireFailsBackend(MemoryBackend);

#[async_trait]
impl CacheBackend for ExpireFailsBackend {
    async fn connect(&self) -> Result<(), CacheError> {
        self.0.connect().await
    }
    async fn ping(&self) -> Result<(), CacheError> {
        self.0.ping().await
    }
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.0.get(key).await
    }
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.0.set_ex(key, value, ttl_seconds).await
    }
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.0.del(keys).await
    }
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.0.keys(pattern).await
    }
    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.0.incr(key).await
    }
    async fn expire(&self, _key: &str, _seconds: u64) -> Result<(), CacheError> {
        Err(CacheError::Backend("EXPIRE rejected".to_string()))
    }
    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        self.0.ttl(key).await
    }
    async fn quit(&self) -> Result<(), CacheError> {
        self.0.quit().await
    }
    fn name(&self) -> &'static str {
        "expire-fails"
    }
}

#[tokio::test]
async fn test_failed_expiry_never_leaves_an_unbounded_counter() {
    let (logger, sink) = test_logger();
    let backend = Arc::new(ExpireFailsBackend(MemoryBackend::new()));
    let store = CacheStore::with_backend(backend.clone(), ReconnectPolicy::default(), logger);
    assert!(store.initialize().await);

    assert_eq!(store.increment_rate_limit("ip:10.0.0.9:/api/login", 60_000).await, 0);
    assert_eq!(store.increment_rate_limit("ip:10.0.0.9:/api/login", 60_000).await, 0);

    let key = CacheKeys::rate_limit("ip:10.0.0.9:/api/login");
    assert_eq!(store.get_ttl(&key).await, -2);
    assert_eq!(backend.0.len(), 0);
    assert_eq!(store.state(), ConnectionState::Ready);
    assert!(sink.contains(LogLevel::Warn, "Cache operation failed"));
}

// =====================================================================================
// DEGRADATION
// =====================================================================================

#[tokio::test]
async fn test_disabled_store_returns_sentinels() {
    let (logger, _) = test_logger();
    let store = CacheStore::disabled(logger);

    assert!(!store.initialize().await);
    assert!(!store.is_enabled());
    assert!(!store.set("property:p1", &sample_property("p1"), 60).await);
    assert!(store.get::<Property>("property:p1").await.is_none());
    assert!(!store.delete("property:p1").await);
    assert_eq!(store.delete_pattern("[unclosed").await, 0);
    assert_eq!(store.increment_rate_limit("ip:1", 1_000).await, 0);
    assert_eq!(store.get_rate_limit_count("ip:1").await, 0);
    assert_eq!(store.get_ttl("property:p1").await, -2);
    assert_eq!(store.invalidate().all().await, 0);
    store.close().await;
}

#[tokio::test]
async fn test_unconfigured_development_store_is_disabled() {
    let (logger, _) = test_logger();
    let config = AppConfig {
        environment: Environment::Development,
        redis_url: None,
        ..AppConfig::default()
    };

    let store = CacheStore::new(&config, logger);

    assert!(!store.is_enabled());
    assert!(!store.initialize().await);
    assert_eq!(store.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_gives_up_after_max_retries() {
    let backend = Arc::new(MemoryBackend::offline());
    let (logger, sink) = test_logger();
    let store = CacheStore::with_backend(backend, ReconnectPolicy::default(), logger);

    assert!(!store.initialize().await);
    assert_eq!(store.state(), ConnectionState::Error);
    assert!(sink.contains(LogLevel::Error, "giving up after max retries"));

    assert!(!store.set("property:p1", &sample_property("p1"), 60).await);
    assert!(store.get::<Property>("property:p1").await.is_none());
    assert_eq!(store.delete_pattern("property:*").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_degrades_then_recovers() {
    let (store, backend, sink) = connected_store().await;
    store.set("property:p1", &sample_property("p1"), 600).await;

    backend.set_online(false);
    assert!(store.get::<Property>("property:p1").await.is_none());
    assert_eq!(store.state(), ConnectionState::Reconnecting);
    assert!(sink.contains(LogLevel::Error, "Cache backend lost"));

    // Further calls are no-ops, not more failures
    let errors_after_loss = store.status().errors;
    assert!(!store.set("property:p2", &sample_property("p2"), 600).await);
    assert_eq!(store.status().errors, errors_after_loss);

    backend.set_online(true);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(store.is_connected());
    assert_eq!(store.get::<Property>("property:p1").await, Some(sample_property("p1")));
}

#[tokio::test]
async fn test_state_transitions_are_logged_once() {
    let (store, _, sink) = connected_store().await;

    store.set("stats:a", &1, 60).await;
    store.set("stats:b", &2, 60).await;

    let transitions = sink
        .entries()
        .into_iter()
        .filter(|entry| entry.message == "Cache connection state changed")
        .count();
    assert_eq!(transitions, 2);
    assert_eq!(store.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn test_close_marks_disconnected() {
    let (store, _, sink) = connected_store().await;

    store.close().await;

    assert_eq!(store.state(), ConnectionState::Disconnected);
    assert!(sink.contains(LogLevel::Info, "Cache connection closed"));
    assert!(!store.set("stats:a", &1, 60).await);
}
