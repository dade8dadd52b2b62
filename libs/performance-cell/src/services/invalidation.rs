use serde_json::json;

use crate::models::CacheKeys;
use crate::services::backend::escape_glob;
use crate::services::cache::CacheStore;

/// Entity-specific fan-out. Each method evicts the entity's own key and every
/// derived listing computed from it, and returns the number of keys removed.
pub struct Invalidator<'a> {
    cache: &'a CacheStore,
}

impl<'a> Invalidator<'a> {
    pub(crate) fn new(cache: &'a CacheStore) -> Self {
        Self { cache }
    }

    /// Property detail, every property-list variant, and the property's review lists.
    pub async fn property(&self, property_id: &str) -> u64 {
        let id = escape_glob(property_id);
        self.run(
            "property",
            property_id,
            &[
                CacheKeys::property(&id),
                CacheKeys::property_list("*"),
                CacheKeys::reviews(&id, "*"),
            ],
        )
        .await
    }

    /// Review lists for the property plus the property itself, which carries the
    /// aggregate rating, plus the listings that show that rating.
    pub async fn review(&self, property_id: &str) -> u64 {
        let id = escape_glob(property_id);
        self.run(
            "review",
            property_id,
            &[
                CacheKeys::reviews(&id, "*"),
                CacheKeys::property(&id),
                CacheKeys::property_list("*"),
            ],
        )
        .await
    }

    pub async fn user(&self, user_id: &str) -> u64 {
        let id = escape_glob(user_id);
        self.run(
            "user",
            user_id,
            &[CacheKeys::user(&id), CacheKeys::user_facet(&id, "*")],
        )
        .await
    }

    pub async fn stats(&self) -> u64 {
        self.run("stats", "*", &[CacheKeys::stats("*")]).await
    }

    /// Every entity key. Rate-limit counters are not cached data and survive.
    pub async fn all(&self) -> u64 {
        self.run(
            "all",
            "*",
            &[
                CacheKeys::property("*"),
                CacheKeys::property_list("*"),
                CacheKeys::reviews("*", "*"),
                CacheKeys::user("*"),
                CacheKeys::stats("*"),
            ],
        )
        .await
    }

    async fn run(&self, entity: &str, id: &str, patterns: &[String]) -> u64 {
        let mut removed = 0;
        for pattern in patterns {
            removed += self.cache.delete_pattern(pattern).await;
        }

        self.cache.logger().debug(
            "Cache invalidated",
            Some(json!({ "entity": entity, "id": id, "removed": removed })),
        );
        removed
    }
}
