// =====================================================================================
// REDIS CACHE BACKEND
// =====================================================================================

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::FromRedisValue;
use tracing::{debug, info};

use crate::models::CacheError;
use crate::services::backend::CacheBackend;

/// INCR plus EXPIRE-on-create in one server-side step.
const INCR_WINDOW_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

pub struct RedisBackend {
    url: String,
    pool: RwLock<Option<Pool>>,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("url", &sanitize_url(&self.url))
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisBackend {
    /// No I/O happens here; the pool is created by `connect`.
    pub fn new(url: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            pool: RwLock::new(None),
            command_timeout,
        }
    }

    fn current_pool(&self) -> Result<Pool, CacheError> {
        self.pool
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| CacheError::Unavailable("redis pool not initialized".to_string()))
    }

    async fn connection(pool: &Pool) -> Result<Connection, CacheError> {
        pool.get()
            .await
            .map_err(|e| CacheError::Unavailable(format!("failed to get redis connection: {}", e)))
    }

    /// Runs one command on a pooled connection, bounded by the command timeout.
    async fn query<T>(&self, command: redis::Cmd) -> Result<T, CacheError>
    where
        T: FromRedisValue + Send,
    {
        let pool = self.current_pool()?;
        let run = async {
            let mut conn = Self::connection(&pool).await?;
            let value: T = command.query_async(&mut conn).await?;
            Ok::<T, CacheError>(value)
        };

        tokio::time::timeout(self.command_timeout, run)
            .await
            .map_err(|_| CacheError::Timeout(self.command_timeout.as_millis() as u64))?
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn connect(&self) -> Result<(), CacheError> {
        debug!("Connecting to Redis at {}", sanitize_url(&self.url));

        let pool = Config::from_url(self.url.clone())
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Unavailable(format!("failed to create redis pool: {}", e)))?;

        let mut conn = Self::connection(&pool).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        drop(conn);

        *self
            .pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(pool);

        info!("Redis connection established");
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let _: String = self.query(redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut command = redis::cmd("GET");
        command.arg(key);
        self.query(command).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut command = redis::cmd("SET");
        command.arg(key).arg(value).arg("EX").arg(ttl_seconds.max(1));
        let _: () = self.query(command).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut command = redis::cmd("DEL");
        command.arg(keys);
        self.query(command).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut command = redis::cmd("KEYS");
        command.arg(pattern);
        self.query(command).await
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut command = redis::cmd("INCR");
        command.arg(key);
        self.query(command).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), CacheError> {
        let mut command = redis::cmd("EXPIRE");
        command.arg(key).arg(seconds);
        let _: i64 = self.query(command).await?;
        Ok(())
    }

    async fn incr_window(&self, key: &str, seconds: u64) -> Result<i64, CacheError> {
        let mut command = redis::cmd("EVAL");
        command
            .arg(INCR_WINDOW_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(seconds.max(1));
        self.query(command).await
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        let mut command = redis::cmd("TTL");
        command.arg(key);
        self.query(command).await
    }

    async fn quit(&self) -> Result<(), CacheError> {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(pool) = pool {
            pool.close();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Hides the password portion of a connection URL for logging.
pub fn sanitize_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end + 3 => {
            let credentials = &url[scheme_end + 3..at];
            let user = credentials.split(':').next().unwrap_or_default();
            if credentials.contains(':') {
                format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at..])
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}
