// =====================================================================================
// CACHE STORE - TTL CACHE WITH GRACEFUL DEGRADATION
// =====================================================================================

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use crate::models::{CacheError, CacheKeys, CacheStatus, ConnectionState};
use crate::services::backend::CacheBackend;
use crate::services::invalidation::Invalidator;
use crate::services::redis_backend::{sanitize_url, RedisBackend};
use shared_config::AppConfig;
use shared_logging::{LogLevel, StructuredLogger};

/// Linear backoff, capped, with a hard retry limit.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub step: Duration,
    pub max_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            step: Duration::from_millis(100),
            max_delay: Duration::from_millis(3_000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `retries` (1-based), or `None` once the limit is passed.
    pub fn delay_for(&self, retries: u32) -> Option<Duration> {
        if retries > self.max_retries {
            return None;
        }
        Some((self.step * retries).min(self.max_delay))
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

struct CacheInner {
    backend: Option<Arc<dyn CacheBackend>>,
    state: AtomicU8,
    reconnecting: AtomicBool,
    closed: AtomicBool,
    policy: ReconnectPolicy,
    counters: CacheCounters,
    logger: Arc<StructuredLogger>,
}

/// Process-wide cache handle. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.inner.backend.as_ref().map(|b| b.name()))
            .field("state", &self.state())
            .finish()
    }
}

impl CacheStore {
    /// Builds a Redis-backed store from configuration. Outside production with no
    /// `REDIS_URL` the store is disabled and every operation is a no-op.
    pub fn new(config: &AppConfig, logger: Arc<StructuredLogger>) -> Self {
        let policy = ReconnectPolicy {
            connect_timeout: Duration::from_millis(config.redis_connect_timeout_ms),
            ..ReconnectPolicy::default()
        };

        let backend = config.cache_url().map(|url| {
            logger.debug(
                "Cache backend configured",
                Some(json!({ "url": sanitize_url(&url) })),
            );
            Arc::new(RedisBackend::new(
                url,
                Duration::from_millis(config.redis_command_timeout_ms),
            )) as Arc<dyn CacheBackend>
        });

        Self::from_parts(backend, policy, logger)
    }

    pub fn with_backend(
        backend: Arc<dyn CacheBackend>,
        policy: ReconnectPolicy,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        Self::from_parts(Some(backend), policy, logger)
    }

    pub fn disabled(logger: Arc<StructuredLogger>) -> Self {
        Self::from_parts(None, ReconnectPolicy::default(), logger)
    }

    fn from_parts(
        backend: Option<Arc<dyn CacheBackend>>,
        policy: ReconnectPolicy,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                reconnecting: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                policy,
                counters: CacheCounters::default(),
                logger,
            }),
        }
    }

    // =================================================================================
    // LIFECYCLE
    // =================================================================================

    /// Connects with bounded retries. Returns `false` when the cache is disabled or
    /// the backend never became ready; callers carry on without a cache.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> bool {
        if self.inner.backend.is_none() {
            self.inner
                .logger
                .debug("Cache disabled: no backend configured", None);
            return false;
        }

        self.inner.closed.store(false, Ordering::SeqCst);
        self.inner.transition(ConnectionState::Connecting);
        self.inner.connect_with_retry().await
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.backend.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let Some(backend) = self.inner.backend.clone() else {
            return;
        };

        match backend.quit().await {
            Ok(()) => self.inner.logger.info("Cache connection closed", None),
            Err(e) => self.inner.logger.warn(
                "Cache connection did not close cleanly",
                Some(json!({ "error": e.to_string() })),
            ),
        }
        self.inner.transition(ConnectionState::Disconnected);
    }

    pub fn status(&self) -> CacheStatus {
        let counters = &self.inner.counters;
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStatus {
            enabled: self.is_enabled(),
            state: self.state(),
            hits,
            misses,
            sets: counters.sets.load(Ordering::Relaxed),
            deletes: counters.deletes.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    // =================================================================================
    // KEY / VALUE OPERATIONS
    // =================================================================================

    /// Serializes `value` as JSON and stores it for `ttl_seconds`.
    pub async fn set<T>(&self, key: &str, value: &T, ttl_seconds: u64) -> bool
    where
        T: Serialize + ?Sized,
    {
        let Some(backend) = self.ready_backend() else {
            return false;
        };

        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.inner.logger.warn(
                    "Cache value could not be serialized",
                    Some(json!({ "key": key, "error": e.to_string() })),
                );
                return false;
            }
        };

        match backend.set_ex(key, &serialized, ttl_seconds).await {
            Ok(()) => {
                self.inner.counters.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                CacheInner::handle_failure(&self.inner, "set", key, e);
                false
            }
        }
    }

    /// `None` on a miss, when unavailable, or when the stored value does not
    /// deserialize into `T`.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let backend = self.ready_backend()?;

        match backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
                    self.inner.logger.warn(
                        "Cached value could not be deserialized",
                        Some(json!({ "key": key, "error": e.to_string() })),
                    );
                    None
                }
            },
            Ok(None) => {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                CacheInner::handle_failure(&self.inner, "get", key, e);
                None
            }
        }
    }

    /// `true` when the key existed and was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let Some(backend) = self.ready_backend() else {
            return false;
        };

        match backend.del(&[key.to_string()]).await {
            Ok(removed) => {
                self.inner.counters.deletes.fetch_add(removed, Ordering::Relaxed);
                removed > 0
            }
            Err(e) => {
                CacheInner::handle_failure(&self.inner, "delete", key, e);
                false
            }
        }
    }

    /// Deletes every key matching a glob pattern and returns how many went.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.ready_backend() else {
            return 0;
        };

        let keys = match backend.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                CacheInner::handle_failure(&self.inner, "delete_pattern", pattern, e);
                return 0;
            }
        };

        if keys.is_empty() {
            return 0;
        }

        match backend.del(&keys).await {
            Ok(removed) => {
                self.inner.counters.deletes.fetch_add(removed, Ordering::Relaxed);
                self.inner.logger.debug(
                    "Cache pattern deleted",
                    Some(json!({ "pattern": pattern, "deleted": removed })),
                );
                removed
            }
            Err(e) => {
                CacheInner::handle_failure(&self.inner, "delete_pattern", pattern, e);
                0
            }
        }
    }

    /// Remaining seconds for `key`; `-1` without expiry, `-2` when missing or unavailable.
    pub async fn get_ttl(&self, key: &str) -> i64 {
        let Some(backend) = self.ready_backend() else {
            return -2;
        };

        match backend.ttl(key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                CacheInner::handle_failure(&self.inner, "ttl", key, e);
                -2
            }
        }
    }

    /// Cache-aside read. Loader errors are returned to the caller; cache failures
    /// only cost the cache.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        let value = loader().await?;
        self.set(key, &value, ttl_seconds).await;
        Ok(value)
    }

    // =================================================================================
    // RATE-LIMIT COUNTERS
    // =================================================================================

    /// Fixed-window counter. The increment that creates the counter also starts the
    /// window by setting its expiry. Returns `0` when the cache cannot count.
    pub async fn increment_rate_limit(&self, identifier: &str, window_ms: u64) -> u64 {
        let Some(backend) = self.ready_backend() else {
            return 0;
        };
        let key = CacheKeys::rate_limit(identifier);

        let window_seconds = window_ms.div_ceil(1000).max(1);
        let count = match backend.incr_window(&key, window_seconds).await {
            Ok(count) => count,
            Err(e) => {
                CacheInner::handle_failure(&self.inner, "increment_rate_limit", &key, e);
                return 0;
            }
        };

        count.max(0) as u64
    }

    pub async fn get_rate_limit_count(&self, identifier: &str) -> u64 {
        let Some(backend) = self.ready_backend() else {
            return 0;
        };
        let key = CacheKeys::rate_limit(identifier);

        match backend.get(&key).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                CacheInner::handle_failure(&self.inner, "get_rate_limit_count", &key, e);
                0
            }
        }
    }

    // =================================================================================
    // INVALIDATION
    // =================================================================================

    pub fn invalidate(&self) -> Invalidator<'_> {
        Invalidator::new(self)
    }

    pub(crate) fn logger(&self) -> &StructuredLogger {
        &self.inner.logger
    }

    fn ready_backend(&self) -> Option<Arc<dyn CacheBackend>> {
        if !self.is_connected() {
            return None;
        }
        self.inner.backend.clone()
    }
}

impl CacheInner {
    /// Stores the new state and logs when it actually changed. Returns the old state.
    fn transition(&self, next: ConnectionState) -> ConnectionState {
        let previous = ConnectionState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if previous == next {
            return previous;
        }

        let level = match next {
            ConnectionState::Ready => LogLevel::Info,
            ConnectionState::Connecting | ConnectionState::Disconnected => LogLevel::Debug,
            ConnectionState::Reconnecting => LogLevel::Warn,
            ConnectionState::Error => LogLevel::Error,
        };
        self.logger.log(
            level,
            "Cache connection state changed",
            Some(json!({ "from": previous, "to": next })),
        );
        previous
    }

    async fn connect_with_retry(&self) -> bool {
        let Some(backend) = self.backend.clone() else {
            return false;
        };

        let mut retries = 0;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }

            let error = match tokio::time::timeout(self.policy.connect_timeout, backend.connect())
                .await
            {
                Ok(Ok(())) => {
                    self.transition(ConnectionState::Ready);
                    return true;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "connect timed out after {}ms",
                    self.policy.connect_timeout.as_millis()
                ),
            };

            retries += 1;
            match self.policy.delay_for(retries) {
                Some(delay) => {
                    self.transition(ConnectionState::Reconnecting);
                    self.logger.debug(
                        "Cache connect attempt failed, retrying",
                        Some(json!({
                            "retry": retries,
                            "delay_ms": delay.as_millis() as u64,
                            "error": error,
                        })),
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    self.transition(ConnectionState::Error);
                    self.logger.error(
                        "Cache unavailable, giving up after max retries",
                        Some(json!({ "retries": retries - 1, "error": error })),
                    );
                    return false;
                }
            }
        }
    }

    /// Connection failures flip the store to `Reconnecting` and start a single
    /// background reconnect; other failures are logged per call.
    fn handle_failure(this: &Arc<Self>, operation: &str, key: &str, error: CacheError) {
        this.counters.errors.fetch_add(1, Ordering::Relaxed);

        if !error.is_connection_error() {
            this.logger.warn(
                "Cache operation failed",
                Some(json!({ "operation": operation, "key": key, "error": error.to_string() })),
            );
            return;
        }

        let previous = this.transition(ConnectionState::Reconnecting);
        if previous == ConnectionState::Ready {
            this.logger.error(
                "Cache backend lost, operations degrade to no-ops",
                Some(json!({ "operation": operation, "error": error.to_string() })),
            );
        }

        if this.closed.load(Ordering::SeqCst)
            || this.reconnecting.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let inner = Arc::clone(this);
        tokio::spawn(async move {
            inner.connect_with_retry().await;
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}
