// =====================================================================================
// FIXED-WINDOW RATE LIMITER
// =====================================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::instrument;

use crate::models::{DegradePolicy, RateLimitError, RateLimitPreset, RateLimitResult};
use performance_cell::services::{CacheBackend, MemoryBackend};
use performance_cell::{CacheKeys, CacheStore};
use shared_config::AppConfig;
use shared_logging::StructuredLogger;

/// Longest window a caller can ask for; larger windows are clamped to it.
pub const MAX_WINDOW_MS: u64 = 366 * 24 * 60 * 60 * 1_000;

/// Counts requests per identifier in fixed windows. The window opens with the first
/// request and every counter lives in the shared cache; while the cache cannot
/// count, the configured `DegradePolicy` decides.
pub struct RateLimiter {
    cache: CacheStore,
    policy: DegradePolicy,
    fallback: MemoryBackend,
    degraded: AtomicBool,
    default_max_requests: u64,
    default_window_ms: u64,
    logger: Arc<StructuredLogger>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("degraded", &self.is_degraded())
            .field("default_max_requests", &self.default_max_requests)
            .field("default_window_ms", &self.default_window_ms)
            .finish()
    }
}

impl RateLimiter {
    /// Fails only when `RATE_LIMIT_DEGRADE_POLICY` names an unknown policy.
    pub fn new(
        config: &AppConfig,
        cache: CacheStore,
        logger: Arc<StructuredLogger>,
    ) -> Result<Self, RateLimitError> {
        let policy = config.rate_limit_degrade_policy.parse()?;
        Ok(Self::with_policy(cache, policy, logger).with_defaults(
            config.rate_limit_max_requests,
            config.rate_limit_window_ms,
        ))
    }

    pub fn with_policy(
        cache: CacheStore,
        policy: DegradePolicy,
        logger: Arc<StructuredLogger>,
    ) -> Self {
        let preset = RateLimitPreset::Api;
        Self {
            cache,
            policy,
            fallback: MemoryBackend::new(),
            degraded: AtomicBool::new(false),
            default_max_requests: preset.max_requests(),
            default_window_ms: preset.window_ms(),
            logger,
        }
    }

    pub fn with_defaults(mut self, max_requests: u64, window_ms: u64) -> Self {
        self.default_max_requests = max_requests;
        self.default_window_ms = window_ms.clamp(1, MAX_WINDOW_MS);
        self
    }

    pub fn policy(&self) -> DegradePolicy {
        self.policy
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub async fn check_default(&self, identifier: &str) -> RateLimitResult {
        self.check(identifier, self.default_max_requests, self.default_window_ms)
            .await
    }

    pub async fn check_preset(&self, identifier: &str, preset: RateLimitPreset) -> RateLimitResult {
        self.check(identifier, preset.max_requests(), preset.window_ms())
            .await
    }

    #[instrument(skip(self))]
    pub async fn check(&self, identifier: &str, max_requests: u64, window_ms: u64) -> RateLimitResult {
        let window_ms = window_ms.clamp(1, MAX_WINDOW_MS);
        let count = self.cache.increment_rate_limit(identifier, window_ms).await;

        if count > 0 {
            self.mark_restored();
            let ttl = self.cache.get_ttl(&CacheKeys::rate_limit(identifier)).await;
            return Self::outcome(count, max_requests, window_ms, ttl);
        }

        self.mark_degraded(identifier);
        match self.policy {
            DegradePolicy::FailOpen => RateLimitResult {
                success: true,
                limit: max_requests,
                remaining: max_requests,
                reset_time: reset_after(ChronoDuration::try_milliseconds(window_ms as i64)),
            },
            DegradePolicy::FailClosed => RateLimitResult {
                success: false,
                limit: max_requests,
                remaining: 0,
                reset_time: reset_after(ChronoDuration::try_milliseconds(window_ms as i64)),
            },
            DegradePolicy::InMemory => self.check_in_memory(identifier, max_requests, window_ms).await,
        }
    }

    /// Drops expired in-memory counters; returns how many went.
    pub fn sweep_fallback(&self) -> usize {
        self.fallback.sweep()
    }

    // =================================================================================
    // INTERNALS
    // =================================================================================

    async fn check_in_memory(&self, identifier: &str, max_requests: u64, window_ms: u64) -> RateLimitResult {
        let key = CacheKeys::rate_limit(identifier);

        let counted = async {
            let count = self
                .fallback
                .incr_window(&key, window_ms.div_ceil(1000).max(1))
                .await?;
            let ttl = self.fallback.ttl(&key).await?;
            Ok::<_, performance_cell::CacheError>((count.max(0) as u64, ttl))
        }
        .await;

        match counted {
            Ok((count, ttl)) => Self::outcome(count, max_requests, window_ms, ttl),
            // Only reachable if a counter key holds a non-integer value.
            Err(e) => {
                self.logger.error(
                    "In-memory rate limit counter failed",
                    Some(json!({ "identifier": identifier, "error": e.to_string() })),
                );
                RateLimitResult {
                    success: true,
                    limit: max_requests,
                    remaining: max_requests,
                    reset_time: reset_after(ChronoDuration::try_milliseconds(window_ms as i64)),
                }
            }
        }
    }

    fn outcome(count: u64, max_requests: u64, window_ms: u64, ttl_seconds: i64) -> RateLimitResult {
        let until_reset = if ttl_seconds > 0 {
            ChronoDuration::try_seconds(ttl_seconds)
        } else {
            ChronoDuration::try_milliseconds(window_ms as i64)
        };

        RateLimitResult {
            success: count <= max_requests,
            limit: max_requests,
            remaining: max_requests.saturating_sub(count),
            reset_time: reset_after(until_reset),
        }
    }

    fn mark_degraded(&self, identifier: &str) {
        if self.degraded.swap(true, Ordering::SeqCst) {
            return;
        }

        let message = match self.policy {
            DegradePolicy::FailOpen => "Rate limiting disabled: cache unavailable, admitting all requests",
            DegradePolicy::FailClosed => "Rate limiting failing closed: cache unavailable, rejecting all requests",
            DegradePolicy::InMemory => "Rate limiting degraded to in-memory counters: cache unavailable",
        };
        self.logger.warn(
            message,
            Some(json!({
                "policy": self.policy.as_str(),
                "cache_enabled": self.cache.is_enabled(),
                "identifier": identifier,
            })),
        );
    }

    fn mark_restored(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            self.logger.info(
                "Rate limiting restored: cache available",
                Some(json!({ "policy": self.policy.as_str() })),
            );
        }
    }
}

/// `now + delta`, saturating at the latest representable time.
fn reset_after(delta: Option<ChronoDuration>) -> DateTime<Utc> {
    delta
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
