// =====================================================================================
// IN-PROCESS CACHE BACKEND
// =====================================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::Instant;

use crate::models::CacheError;
use crate::services::backend::CacheBackend;

const SWEEP_THRESHOLD: usize = 1_024;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// `None` when the deadline lies past what `Instant` can represent.
fn deadline(now: Instant, seconds: u64) -> Option<Instant> {
    now.checked_add(Duration::from_secs(seconds))
}

/// Map-backed implementation of the backend trait. Serves as the rate limiter's
/// local fallback store and as the backend in tests. Expired entries are removed
/// lazily on access and swept whenever the map grows past a threshold.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    online: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// A backend that refuses every command until `set_online(true)`.
    pub fn offline() -> Self {
        let backend = Self::new();
        backend.set_online(false);
        backend
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> Result<(), CacheError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(CacheError::Unavailable("memory backend offline".to_string()))
        }
    }

    fn incr_locked<'a>(
        entries: &'a mut HashMap<String, MemoryEntry>,
        key: &str,
        now: Instant,
    ) -> Result<(i64, &'a mut MemoryEntry), CacheError> {
        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.is_expired(now) {
                    entry.value = "0".to_string();
                    entry.expires_at = None;
                }
            })
            .or_insert_with(|| MemoryEntry {
                value: "0".to_string(),
                expires_at: None,
            });

        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::Backend(format!("value at {} is not an integer", key)))?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok((next, entry))
    }

    fn sweep_if_large(entries: &mut HashMap<String, MemoryEntry>, now: Instant) {
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, entry| !entry.is_expired(now));
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn connect(&self) -> Result<(), CacheError> {
        self.ensure_online()
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.ensure_online()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.lock();
        Self::sweep_if_large(&mut entries, now);

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: deadline(now, ttl_seconds),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.lock();

        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.ensure_online()?;
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let entries = self.lock();

        let mut matched: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.lock();
        Self::sweep_if_large(&mut entries, now);
        Self::incr_locked(&mut entries, key, now).map(|(count, _)| count)
    }

    async fn incr_window(&self, key: &str, seconds: u64) -> Result<i64, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.lock();
        Self::sweep_if_large(&mut entries, now);

        let (count, entry) = Self::incr_locked(&mut entries, key, now)?;
        if count == 1 {
            entry.expires_at = deadline(now, seconds);
        }
        Ok(count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.lock();

        if let Some(entry) = entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at = deadline(now, seconds);
            }
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        self.ensure_online()?;
        let now = Instant::now();
        let entries = self.lock();

        Ok(match entries.get(key) {
            None => -2,
            Some(entry) if entry.is_expired(now) => -2,
            Some(MemoryEntry { expires_at: None, .. }) => -1,
            Some(MemoryEntry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(now);
                remaining.as_millis().div_ceil(1000) as i64
            }
        })
    }

    async fn quit(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Translates a Redis-style glob into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut expression = String::with_capacity(pattern.len() + 8);
    expression.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => expression.push_str(&regex::escape(&escaped.to_string())),
                None => expression.push_str(&regex::escape("\\")),
            },
            '[' => {
                let mut class = String::from("[");
                let mut closed = false;
                let mut first = true;
                while let Some(inner) = chars.next() {
                    match inner {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '^' if first => class.push('^'),
                        '-' => class.push('-'),
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                class.push_str(&regex::escape(&escaped.to_string()));
                            }
                        }
                        other => class.push_str(&regex::escape(&other.to_string())),
                    }
                    first = false;
                }
                if !closed {
                    return Err(CacheError::InvalidPattern(pattern.to_string()));
                }
                class.push(']');
                expression.push_str(&class);
            }
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }

    expression.push('$');
    Regex::new(&expression).map_err(|_| CacheError::InvalidPattern(pattern.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_wildcards() {
        let re = glob_to_regex("reviews:42:*").unwrap();
        assert!(re.is_match("reviews:42:page:1"));
        assert!(re.is_match("reviews:42:"));
        assert!(!re.is_match("reviews:420:page:1"));

        let re = glob_to_regex("user:?").unwrap();
        assert!(re.is_match("user:7"));
        assert!(!re.is_match("user:77"));
    }

    #[test]
    fn glob_classes_and_escapes() {
        let re = glob_to_regex("stats:[ab]*").unwrap();
        assert!(re.is_match("stats:admin"));
        assert!(!re.is_match("stats:cpu"));

        let re = glob_to_regex("property:a\\*b").unwrap();
        assert!(re.is_match("property:a*b"));
        assert!(!re.is_match("property:axxb"));

        let re = glob_to_regex("a.b").unwrap();
        assert!(!re.is_match("axb"));
    }

    #[test]
    fn unclosed_class_is_rejected() {
        assert!(matches!(
            glob_to_regex("stats:[ab"),
            Err(CacheError::InvalidPattern(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn incr_restarts_after_expiry() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.incr("k").await.unwrap(), 1);
        backend.expire("k", 1).await.unwrap();
        assert_eq!(backend.incr("k").await.unwrap(), 2);
        assert_eq!(backend.ttl("k").await.unwrap(), 1);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(backend.ttl("k").await.unwrap(), -2);
        assert_eq!(backend.incr("k").await.unwrap(), 1);
        assert_eq!(backend.ttl("k").await.unwrap(), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn incr_window_sets_expiry_once() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.incr_window("w", 2).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(backend.incr_window("w", 2).await.unwrap(), 2);
        assert_eq!(backend.ttl("w").await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(backend.incr_window("w", 2).await.unwrap(), 1);
        assert_eq!(backend.ttl("w").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unrepresentable_expiry_does_not_panic() {
        let backend = MemoryBackend::new();
        backend.set_ex("far", "1", u64::MAX).await.unwrap();
        assert_eq!(backend.get("far").await.unwrap().as_deref(), Some("1"));
        assert_eq!(backend.incr_window("w", u64::MAX).await.unwrap(), 1);
        assert_eq!(backend.ttl("w").await.unwrap(), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired() {
        let backend = MemoryBackend::new();
        backend.set_ex("short", "1", 1).await.unwrap();
        backend.set_ex("long", "1", 60).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(backend.sweep(), 1);
        assert_eq!(backend.len(), 1);
    }
}
