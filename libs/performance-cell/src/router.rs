use axum::{routing::get, Router};

use crate::handlers::{get_cache_status, PerformanceHandlers};
use crate::services::CacheStore;

/// Mounted under `/cache` by the API.
pub fn create_performance_router(cache: CacheStore) -> Router {
    let handlers = PerformanceHandlers::new(cache);

    Router::new()
        .route("/status", get(get_cache_status))
        .with_state(handlers)
}
