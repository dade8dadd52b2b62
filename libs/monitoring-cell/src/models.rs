// =====================================================================================
// MONITORING CELL MODELS
// =====================================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =====================================================================================
// METRICS
// =====================================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Per-name aggregates, ordered by metric name.
pub type MetricsSummary = BTreeMap<String, MetricSummary>;

/// Counters reported through `track_business_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessEvent {
    BookingCreated,
    BookingCancelled,
    PaymentSucceeded,
    PaymentFailed,
    UserRegistered,
    PropertyListed,
    ReviewSubmitted,
}

impl BusinessEvent {
    pub fn metric_name(&self) -> &'static str {
        match self {
            BusinessEvent::BookingCreated => "business.booking.created",
            BusinessEvent::BookingCancelled => "business.booking.cancelled",
            BusinessEvent::PaymentSucceeded => "business.payment.succeeded",
            BusinessEvent::PaymentFailed => "business.payment.failed",
            BusinessEvent::UserRegistered => "business.user.registered",
            BusinessEvent::PropertyListed => "business.property.listed",
            BusinessEvent::ReviewSubmitted => "business.review.submitted",
        }
    }
}

// =====================================================================================
// ALERTS
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Severity::Critical => "#dc2626",
            Severity::High => "#ea580c",
            Severity::Medium => "#ca8a04",
            Severity::Low => "#16a34a",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Critical => "🔴",
            Severity::High => "🟠",
            Severity::Medium => "🟡",
            Severity::Low => "🟢",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Console,
    Slack,
    Email,
    PagerDuty,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Console => "console",
            ChannelKind::Slack => "slack",
            ChannelKind::Email => "email",
            ChannelKind::PagerDuty => "pagerduty",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a rule. Alerts carry it explicitly so lookup never depends
/// on display text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKey {
    HighResponseTime,
    SlowDatabase,
    HighCpu,
    HighMemory,
    HighErrorRate,
    SecurityIncident,
}

impl RuleKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKey::HighResponseTime => "high_response_time",
            RuleKey::SlowDatabase => "slow_database",
            RuleKey::HighCpu => "high_cpu",
            RuleKey::HighMemory => "high_memory",
            RuleKey::HighErrorRate => "high_error_rate",
            RuleKey::SecurityIncident => "security_incident",
        }
    }

    /// Rule watching a thresholded metric, if any.
    pub fn for_metric(metric: &str) -> Option<Self> {
        match metric {
            "response.time" => Some(RuleKey::HighResponseTime),
            "database.latency" => Some(RuleKey::SlowDatabase),
            "cpu.usage" => Some(RuleKey::HighCpu),
            "memory.usage" => Some(RuleKey::HighMemory),
            "error.rate" => Some(RuleKey::HighErrorRate),
            _ => None,
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub key: RuleKey,
    pub name: String,
    /// Breached when a value rises strictly above it.
    pub threshold: f64,
    pub severity: Severity,
    pub channels: BTreeSet<ChannelKind>,
    pub cooldown: Duration,
}

impl AlertRule {
    pub fn is_breached(&self, value: f64) -> bool {
        value > self.threshold
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleKey>,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(title: &str, message: &str, severity: Severity, metadata: Option<Value>) -> Self {
        let timestamp = Utc::now();
        Self {
            id: format!("{}-{}", slug(title), timestamp.timestamp_millis()),
            rule: None,
            title: title.to_string(),
            message: message.to_string(),
            severity,
            metadata,
            timestamp,
        }
    }

    pub fn for_rule(mut self, rule: RuleKey) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Cooldown and statistics key: the rule when known, the title otherwise.
    pub fn identity(&self) -> String {
        match self.rule {
            Some(rule) => rule.as_str().to_string(),
            None => self.title.clone(),
        }
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slug(text: &str) -> String {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub suppressed: bool,
    pub delivered: Vec<ChannelKind>,
    pub failed: Vec<ChannelKind>,
    pub skipped: Vec<ChannelKind>,
}

impl DispatchReport {
    pub fn suppressed() -> Self {
        Self {
            suppressed: true,
            ..Self::default()
        }
    }

    /// Every attempted channel failed.
    pub fn is_blackout(&self) -> bool {
        !self.failed.is_empty() && self.delivered.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStatistics {
    pub total_alerts: u64,
    pub distinct_alerts: usize,
    pub per_alert: BTreeMap<String, u64>,
    pub failed_dispatches: u64,
}

// =====================================================================================
// ERRORS
// =====================================================================================

#[derive(Debug, thiserror::Error)]
pub enum MonitoringError {
    #[error("Invalid alert rule table: {0}")]
    InvalidRule(String),
    #[error("No buffered samples for metric {0}")]
    UnknownMetric(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Admin routes are disabled: no admin token configured")]
    AdminDisabled,
}

impl IntoResponse for MonitoringError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            MonitoringError::InvalidRule(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Alerting misconfigured")
            }
            MonitoringError::UnknownMetric(_) => (StatusCode::NOT_FOUND, "Metric not found"),
            MonitoringError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            MonitoringError::AdminDisabled => (StatusCode::FORBIDDEN, "Admin routes disabled"),
        };

        (
            status,
            Json(serde_json::json!({
                "error": message,
                "timestamp": Utc::now()
            })),
        )
            .into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("{channel} request failed: {source}")]
    Http {
        channel: ChannelKind,
        #[source]
        source: reqwest::Error,
    },
    #[error("{channel} returned status {status}")]
    Status { channel: ChannelKind, status: u16 },
}
