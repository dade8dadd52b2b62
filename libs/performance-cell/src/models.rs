use serde::{Deserialize, Serialize};

// =====================================================================================
// CONNECTION STATE
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Ready = 2,
    Reconnecting = 3,
    Error = 4,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Ready,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Error,
            _ => ConnectionState::Disconnected,
        }
    }
}

// =====================================================================================
// STATUS SNAPSHOT
// =====================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub enabled: bool,
    pub state: ConnectionState,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

// =====================================================================================
// KEY & TTL POLICY
// =====================================================================================

/// Builders for every key the application caches under. Invalidation patterns are
/// derived from the same prefixes, so keys must be built here.
pub struct CacheKeys;

impl CacheKeys {
    pub fn property(property_id: &str) -> String {
        format!("property:{}", property_id)
    }

    pub fn property_list(variant: &str) -> String {
        format!("properties:list:{}", variant)
    }

    pub fn reviews(property_id: &str, variant: &str) -> String {
        format!("reviews:{}:{}", property_id, variant)
    }

    pub fn user(user_id: &str) -> String {
        format!("user:{}", user_id)
    }

    pub fn user_facet(user_id: &str, facet: &str) -> String {
        format!("user:{}:{}", user_id, facet)
    }

    pub fn stats(name: &str) -> String {
        format!("stats:{}", name)
    }

    pub fn rate_limit(identifier: &str) -> String {
        format!("ratelimit:{}", identifier)
    }
}

/// TTLs in seconds.
pub struct CacheTtl;

impl CacheTtl {
    pub const SHORT: u64 = 60;
    pub const MEDIUM: u64 = 300;

    pub const PROPERTY: u64 = 600;
    pub const PROPERTY_LIST: u64 = Self::MEDIUM;
    pub const REVIEWS: u64 = Self::MEDIUM;
    pub const USER: u64 = 900;
    pub const STATS: u64 = Self::SHORT;
}

// =====================================================================================
// ERRORS
// =====================================================================================

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("Cache command timed out after {0}ms")]
    Timeout(u64),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid key pattern: {0}")]
    InvalidPattern(String),
    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    /// Errors that mean the backend itself is gone, as opposed to a bad command.
    pub fn is_connection_error(&self) -> bool {
        match self {
            CacheError::Unavailable(_) | CacheError::Timeout(_) => true,
            CacheError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout()
            }
            _ => false,
        }
    }
}
