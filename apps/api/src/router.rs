use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use monitoring_cell::{create_monitoring_router, AdminToken, AlertManager, MetricsCollector};
use performance_cell::{create_performance_router, CacheStore};
use security_cell::{rate_limit_middleware, RateLimitState, RateLimiter};
use shared_config::AppConfig;

/// Every long-lived component, built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: CacheStore,
    pub limiter: Arc<RateLimiter>,
    pub alerts: Arc<AlertManager>,
    pub metrics: Arc<MetricsCollector>,
}

pub fn create_router(state: AppState) -> Router {
    let rate_limit = RateLimitState::with_limits(
        state.limiter.clone(),
        state.config.rate_limit_max_requests,
        state.config.rate_limit_window_ms,
    )
    .with_metrics(state.metrics.clone());

    let api = Router::new()
        .route("/api/ping", get(ping))
        .route_layer(middleware::from_fn_with_state(rate_limit, rate_limit_middleware));

    Router::new()
        .route("/", get(|| async { "Nestly API is running!" }))
        .merge(api)
        .nest("/cache", create_performance_router(state.cache.clone()))
        .nest(
            "/monitoring",
            create_monitoring_router(
                state.metrics.clone(),
                state.alerts.clone(),
                AdminToken::new(state.config.monitoring_admin_token.clone()),
            ),
        )
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            record_request,
        ))
}

async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

/// Response time for every request, plus an error count for 5xx responses.
async fn record_request(
    State(metrics): State<Arc<MetricsCollector>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let route = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    metrics
        .track_response_time(&route, started.elapsed().as_millis() as u64)
        .await;
    if response.status().is_server_error() {
        metrics.track_error("server_error", &route).await;
    }
    response
}
