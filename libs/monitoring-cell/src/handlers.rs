// =====================================================================================
// MONITORING CELL HANDLERS
// =====================================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::models::{AlertStatistics, MetricsSummary, MonitoringError};
use crate::services::{AlertManager, MetricsCollector};

#[derive(Clone)]
pub struct MonitoringHandlers {
    metrics: Arc<MetricsCollector>,
    alerts: Arc<AlertManager>,
}

impl MonitoringHandlers {
    pub fn new(metrics: Arc<MetricsCollector>, alerts: Arc<AlertManager>) -> Self {
        Self { metrics, alerts }
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub buffered: usize,
    pub metrics: MetricsSummary,
    pub timestamp: DateTime<Utc>,
}

// =====================================================================================
// METRICS ENDPOINTS
// =====================================================================================

#[instrument(skip(handlers))]
pub async fn get_metrics_summary(
    State(handlers): State<MonitoringHandlers>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, MonitoringError> {
    let mut metrics = handlers.metrics.get_summary().await;

    if let Some(name) = query.name {
        let summary = metrics
            .remove(&name)
            .ok_or_else(|| MonitoringError::UnknownMetric(name.clone()))?;
        metrics = MetricsSummary::from([(name, summary)]);
    }

    Ok(Json(SummaryResponse {
        buffered: handlers.metrics.len().await,
        metrics,
        timestamp: Utc::now(),
    }))
}

// =====================================================================================
// ALERT ENDPOINTS
// =====================================================================================

pub async fn get_alert_statistics(
    State(handlers): State<MonitoringHandlers>,
) -> Json<AlertStatistics> {
    Json(handlers.alerts.get_statistics())
}

#[instrument(skip(handlers))]
pub async fn reset_alert_statistics(State(handlers): State<MonitoringHandlers>) -> StatusCode {
    handlers.alerts.reset_statistics();
    StatusCode::NO_CONTENT
}
