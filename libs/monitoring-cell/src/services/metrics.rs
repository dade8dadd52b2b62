// =====================================================================================
// METRICS COLLECTOR SERVICE
// =====================================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::instrument;

use crate::models::{Metric, MetricSummary, MetricsSummary, RuleKey};
use crate::services::alerts::AlertManager;
use shared_config::AppConfig;
use shared_logging::StructuredLogger;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(60_000);

/// Metric name to the value above which a breach is reported.
pub const THRESHOLDS: [(&str, f64); 5] = [
    ("response.time", 1_000.0),
    ("database.latency", 500.0),
    ("cpu.usage", 80.0),
    ("memory.usage", 90.0),
    ("error.rate", 5.0),
];

pub fn threshold_for(name: &str) -> Option<f64> {
    THRESHOLDS
        .iter()
        .find(|(metric, _)| *metric == name)
        .map(|(_, threshold)| *threshold)
}

/// Value at the `p`th percentile of an ascending slice, nearest-rank:
/// index `ceil(p/100 * n) - 1` clamped into range. `0.0` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as isize - 1;
    let index = rank.clamp(0, sorted.len() as isize - 1) as usize;
    sorted[index]
}

pub fn summarize(metrics: &[Metric]) -> MetricsSummary {
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for metric in metrics {
        groups
            .entry(metric.name.clone())
            .or_default()
            .push(metric.value);
    }

    groups
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(name, mut values)| {
            values.sort_by(|a, b| a.total_cmp(b));
            let count = values.len();
            let sum: f64 = values.iter().sum();
            let summary = MetricSummary {
                count,
                min: values[0],
                max: values[count - 1],
                avg: sum / count as f64,
                p95: percentile(&values, 95.0),
                p99: percentile(&values, 99.0),
            };
            (name, summary)
        })
        .collect()
}

/// In-memory metric buffer, summarized and cleared on every flush.
pub struct MetricsCollector {
    buffer: RwLock<Vec<Metric>>,
    flush_interval: Duration,
    alerts: Option<Arc<AlertManager>>,
    pending_alerts: Mutex<Vec<JoinHandle<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    logger: Arc<StructuredLogger>,
}

impl MetricsCollector {
    pub fn new(config: &AppConfig, logger: Arc<StructuredLogger>) -> Self {
        Self::with_interval(Duration::from_millis(config.metrics_flush_interval_ms), logger)
    }

    pub fn with_interval(flush_interval: Duration, logger: Arc<StructuredLogger>) -> Self {
        Self {
            buffer: RwLock::new(Vec::new()),
            flush_interval,
            alerts: None,
            pending_alerts: Mutex::new(Vec::new()),
            timer: Mutex::new(None),
            logger,
        }
    }

    /// Routes threshold breaches to the alert manager as well as the log.
    pub fn with_alert_manager(mut self, alerts: Arc<AlertManager>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub(crate) fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Hands a rule alert to a spawned task so recording never waits on channel I/O.
    pub(crate) fn dispatch_rule(&self, rule: RuleKey, value: f64, metadata: Option<Value>) {
        let Some(alerts) = self.alerts.clone() else {
            return;
        };

        let handle = tokio::spawn(async move {
            alerts.notify_rule(rule, value, metadata).await;
        });

        let mut pending = self
            .pending_alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|task| !task.is_finished());
        pending.push(handle);
    }

    /// Waits for every alert dispatch started so far.
    pub async fn wait_for_alerts(&self) {
        let pending = std::mem::take(
            &mut *self
                .pending_alerts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in pending {
            if let Err(e) = task.await {
                self.logger.error(
                    "Alert dispatch task failed",
                    Some(json!({ "error": e.to_string() })),
                );
            }
        }
    }

    // =================================================================================
    // RECORDING
    // =================================================================================

    pub async fn record(&self, name: &str, value: f64, tags: Option<HashMap<String, String>>) {
        let metric = Metric {
            name: name.to_string(),
            value,
            tags,
            timestamp: Utc::now(),
        };
        let tags_context = json!(metric.tags);
        self.buffer.write().await.push(metric);

        let Some(threshold) = threshold_for(name) else {
            return;
        };
        if value <= threshold {
            return;
        }

        self.logger.warn(
            &format!("Metric threshold exceeded: {}", name),
            Some(json!({
                "metric": name,
                "value": value,
                "threshold": threshold,
                "tags": tags_context,
            })),
        );

        if let Some(rule) = RuleKey::for_metric(name) {
            self.dispatch_rule(rule, value, Some(json!({ "metric": name, "tags": tags_context })));
        }
    }

    pub async fn get_summary(&self) -> MetricsSummary {
        summarize(&self.buffer.read().await)
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }

    // =================================================================================
    // FLUSH LIFECYCLE
    // =================================================================================

    /// Summarizes and clears the buffer. Returns the logged summary, or `None`
    /// when there was nothing buffered.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Option<MetricsSummary> {
        let drained = std::mem::take(&mut *self.buffer.write().await);
        if drained.is_empty() {
            return None;
        }

        let summary = summarize(&drained);
        self.logger.info(
            "Metrics summary",
            Some(json!({ "metrics": drained.len(), "summary": summary })),
        );
        Some(summary)
    }

    /// Spawns the periodic flush. Calling it twice keeps the first timer.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timer.is_some() {
            return;
        }

        let collector = Arc::downgrade(self);
        let every = self.flush_interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(collector) = collector.upgrade() else {
                    break;
                };
                collector.flush().await;
            }
        }));

        self.logger.debug(
            "Metrics flush timer started",
            Some(json!({ "interval_ms": every.as_millis() as u64 })),
        );
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Stops the timer, lets in-flight alerts finish and drains whatever is still
    /// buffered.
    pub async fn destroy(&self) -> Option<MetricsSummary> {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.wait_for_alerts().await;
        self.flush().await
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        let handle = self
            .timer
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_rank_percentiles() {
        assert_eq!(percentile(&[10.0, 20.0, 30.0, 40.0, 50.0], 95.0), 50.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
        assert_eq!(percentile(&[7.0], 0.0), 7.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn thresholds_cover_watched_metrics() {
        assert_eq!(threshold_for("response.time"), Some(1_000.0));
        assert_eq!(threshold_for("error.rate"), Some(5.0));
        assert_eq!(threshold_for("business.booking.created"), None);
    }
}
