// =====================================================================================
// MONITORING CELL - METRICS COLLECTION & ALERT DISPATCH
// =====================================================================================

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    Alert, AlertError, AlertRule, AlertStatistics, BusinessEvent, ChannelKind, DispatchReport,
    Metric, MetricSummary, MetricsSummary, MonitoringError, RuleKey, Severity,
};

pub use services::{AlertManager, MetricsCollector};

pub use router::create_monitoring_router;
pub use handlers::MonitoringHandlers;
pub use middleware::{require_admin_token, AdminToken};
