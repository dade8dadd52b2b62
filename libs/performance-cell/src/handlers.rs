use axum::{extract::State, Json};

use crate::models::CacheStatus;
use crate::services::CacheStore;

#[derive(Clone)]
pub struct PerformanceHandlers {
    cache: CacheStore,
}

impl PerformanceHandlers {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache }
    }
}

pub async fn get_cache_status(State(handlers): State<PerformanceHandlers>) -> Json<CacheStatus> {
    Json(handlers.cache.status())
}
