pub mod backend;
pub mod cache;
pub mod invalidation;
pub mod memory_backend;
pub mod redis_backend;

pub use backend::{escape_glob, CacheBackend};
pub use cache::{CacheStore, ReconnectPolicy};
pub use invalidation::Invalidator;
pub use memory_backend::MemoryBackend;
pub use redis_backend::{sanitize_url, RedisBackend};
