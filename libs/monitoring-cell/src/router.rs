// =====================================================================================
// MONITORING CELL ROUTER
// =====================================================================================

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::{
    get_alert_statistics, get_metrics_summary, reset_alert_statistics, MonitoringHandlers,
};
use crate::middleware::{require_admin_token, AdminToken};
use crate::services::{AlertManager, MetricsCollector};

/// Mounted under `/monitoring` by the API. Mutating routes need the admin token.
pub fn create_monitoring_router(
    metrics: Arc<MetricsCollector>,
    alerts: Arc<AlertManager>,
    admin_token: AdminToken,
) -> Router {
    let handlers = MonitoringHandlers::new(metrics, alerts);

    let admin = Router::new()
        .route("/alerts/reset", post(reset_alert_statistics))
        .route_layer(middleware::from_fn_with_state(admin_token, require_admin_token));

    Router::new()
        .route("/metrics/summary", get(get_metrics_summary))
        .route("/alerts/statistics", get(get_alert_statistics))
        .merge(admin)
        .with_state(handlers)
}
