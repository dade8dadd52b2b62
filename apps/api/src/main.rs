use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod router;

use monitoring_cell::{AlertManager, MetricsCollector};
use performance_cell::CacheStore;
use router::AppState;
use security_cell::{DegradePolicy, RateLimiter};
use shared_config::AppConfig;
use shared_logging::StructuredLogger;

const ALERT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(15 * 60);
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();
    init_tracing();

    let config = Arc::new(AppConfig::from_env());
    info!(environment = %config.environment, "Starting Nestly API server");

    let logger = Arc::new(StructuredLogger::new(&config));

    // Cache is optional: a failed connect leaves every cache call a no-op
    let cache = CacheStore::new(&config, logger.clone());
    if cache.is_enabled() && !cache.initialize().await {
        warn!("Cache unavailable at startup, continuing without it");
    }

    let limiter = Arc::new(RateLimiter::new(&config, cache.clone(), logger.clone())?);
    if limiter.policy() == DegradePolicy::InMemory {
        let limiter = Arc::downgrade(&limiter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RATE_LIMIT_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.sweep_fallback();
            }
        });
    }

    let alerts = Arc::new(AlertManager::new(&config, logger.clone())?);
    if config.is_production() {
        alerts.start_housekeeping(ALERT_HOUSEKEEPING_INTERVAL);
    }

    let metrics = Arc::new(
        MetricsCollector::new(&config, logger.clone()).with_alert_manager(alerts.clone()),
    );
    metrics.start();
    if config.monitoring_admin_token.is_none() {
        info!("MONITORING_ADMIN_TOKEN unset, admin monitoring routes disabled");
    }

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        config: config.clone(),
        cache: cache.clone(),
        limiter,
        alerts: alerts.clone(),
        metrics: metrics.clone(),
    };

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Drain buffered metrics before the cache goes away
    metrics.destroy().await;
    alerts.stop_housekeeping();
    cache.close().await;

    info!("Nestly API server stopped");
    Ok(())
}
