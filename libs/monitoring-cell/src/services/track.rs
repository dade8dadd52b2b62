//! Named recording helpers used by route middleware and handlers. Each one is a
//! thin call into `MetricsCollector::record` with a fixed metric name and tags.

use std::collections::HashMap;

use serde_json::json;

use crate::models::{BusinessEvent, RuleKey, Severity};
use crate::services::metrics::MetricsCollector;

fn tags<const N: usize>(pairs: [(&str, &str); N]) -> Option<HashMap<String, String>> {
    Some(
        pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
    )
}

impl MetricsCollector {
    pub async fn track_response_time(&self, route: &str, duration_ms: u64) {
        self.record("response.time", duration_ms as f64, tags([("route", route)]))
            .await;
    }

    pub async fn track_database_query(&self, operation: &str, collection: &str, duration_ms: u64) {
        self.record(
            "database.latency",
            duration_ms as f64,
            tags([("operation", operation), ("collection", collection)]),
        )
        .await;
    }

    pub async fn track_error(&self, error_type: &str, route: &str) {
        self.record("error.count", 1.0, tags([("type", error_type), ("route", route)]))
            .await;
    }

    /// Critical events also raise the security incident rule when alerting is wired.
    pub async fn track_security_event(&self, event: &str, severity: Severity) {
        self.record(
            "security.event",
            1.0,
            tags([("event", event), ("severity", severity.as_str())]),
        )
        .await;

        if severity != Severity::Critical {
            return;
        }
        self.logger().log_security(event, Some(json!({ "severity": severity })));
        self.dispatch_rule(RuleKey::SecurityIncident, 1.0, Some(json!({ "event": event })));
    }

    pub async fn track_cache_hit(&self, key_prefix: &str) {
        self.record("cache.hit", 1.0, tags([("prefix", key_prefix)])).await;
    }

    pub async fn track_cache_miss(&self, key_prefix: &str) {
        self.record("cache.miss", 1.0, tags([("prefix", key_prefix)])).await;
    }

    pub async fn track_rate_limit_exceeded(&self, route: &str) {
        self.record("ratelimit.exceeded", 1.0, tags([("route", route)]))
            .await;
    }

    pub async fn track_business_event(&self, event: BusinessEvent) {
        self.record(event.metric_name(), 1.0, None).await;
    }
}
