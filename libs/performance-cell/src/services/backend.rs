use async_trait::async_trait;

use crate::models::CacheError;

/// Minimal command surface the cache store needs from a key/value backend.
/// Values are already-serialized strings; TTLs are in seconds.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Establishes (or re-establishes) the connection and checks liveness.
    async fn connect(&self) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;

    /// Returns how many of `keys` existed and were removed.
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Glob-style match (`*`, `?`, `[...]`, `\` escapes).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), CacheError>;

    /// Increments a window counter and sets `seconds` as its expiry when this
    /// increment created it. A counter is never left behind without an expiry: if
    /// the expiry cannot be set the key is deleted and the error returned.
    async fn incr_window(&self, key: &str, seconds: u64) -> Result<i64, CacheError> {
        let count = self.incr(key).await?;
        if count == 1 {
            if let Err(e) = self.expire(key, seconds).await {
                let _ = self.del(&[key.to_string()]).await;
                return Err(e);
            }
        }
        Ok(count)
    }

    /// Remaining seconds, `-1` for no expiry, `-2` for a missing key.
    async fn ttl(&self, key: &str) -> Result<i64, CacheError>;

    async fn quit(&self) -> Result<(), CacheError>;

    fn name(&self) -> &'static str;
}

/// Escapes glob metacharacters so an id can be embedded in a pattern literally.
pub fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
