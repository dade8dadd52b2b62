// =====================================================================================
// ALERT MANAGER SERVICE
// =====================================================================================

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::instrument;

use crate::models::{
    Alert, AlertRule, AlertStatistics, ChannelKind, DispatchReport,
    MonitoringError, RuleKey, Severity,
};
use crate::services::channels::{channels_from_config, NotificationChannel};
use shared_config::{AppConfig, Environment};
use shared_logging::StructuredLogger;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(300_000);

const MINUTE: Duration = Duration::from_secs(60);

fn channel_set(channels: &[ChannelKind]) -> BTreeSet<ChannelKind> {
    channels.iter().copied().collect()
}

/// Rule table installed at startup.
pub fn default_rules() -> Vec<AlertRule> {
    let rule = |key: RuleKey,
                name: &str,
                threshold: f64,
                severity: Severity,
                channels: &[ChannelKind],
                minutes: u32| AlertRule {
        key,
        name: name.to_string(),
        threshold,
        severity,
        channels: channel_set(channels),
        cooldown: MINUTE * minutes,
    };

    use ChannelKind::{Email, PagerDuty, Slack};
    vec![
        rule(RuleKey::HighResponseTime, "High Response Time", 1_000.0, Severity::High, &[Slack, Email], 5),
        rule(RuleKey::SlowDatabase, "Slow Database Queries", 500.0, Severity::Medium, &[Slack], 5),
        rule(RuleKey::HighCpu, "High CPU Usage", 80.0, Severity::High, &[Slack, Email], 10),
        rule(RuleKey::HighMemory, "High Memory Usage", 90.0, Severity::Critical, &[Slack, Email, PagerDuty], 10),
        rule(RuleKey::HighErrorRate, "High Error Rate", 5.0, Severity::Critical, &[Slack, Email, PagerDuty], 5),
        rule(RuleKey::SecurityIncident, "Security Incident", 0.0, Severity::Critical, &[Slack, Email, PagerDuty], 1),
    ]
}

fn validate_rules(rules: &[AlertRule]) -> Result<(), MonitoringError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.key) {
            return Err(MonitoringError::InvalidRule(format!("duplicate rule key {}", rule.key)));
        }
        if !rule.threshold.is_finite() {
            return Err(MonitoringError::InvalidRule(format!("{} has a non-finite threshold", rule.key)));
        }
        if rule.channels.is_empty() {
            return Err(MonitoringError::InvalidRule(format!("{} has no channels", rule.key)));
        }
        if rule.name.trim().is_empty() {
            return Err(MonitoringError::InvalidRule(format!("{} has an empty name", rule.key)));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct AlertHistory {
    last_alert_time: HashMap<String, Instant>,
    alert_counts: HashMap<String, u64>,
}

pub struct AlertManager {
    rules: Vec<AlertRule>,
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
    environment: Environment,
    default_cooldown: Duration,
    history: Mutex<AlertHistory>,
    failed_dispatches: AtomicU64,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
    logger: Arc<StructuredLogger>,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("rules", &self.rules)
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("environment", &self.environment)
            .field("default_cooldown", &self.default_cooldown)
            .finish_non_exhaustive()
    }
}

impl AlertManager {
    pub fn new(config: &AppConfig, logger: Arc<StructuredLogger>) -> Result<Self, MonitoringError> {
        let channels = channels_from_config(config, logger.clone());
        Self::with_rules(default_rules(), channels, config.environment, logger)
    }

    pub fn with_rules(
        rules: Vec<AlertRule>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        environment: Environment,
        logger: Arc<StructuredLogger>,
    ) -> Result<Self, MonitoringError> {
        validate_rules(&rules)?;

        let channels = channels
            .into_iter()
            .map(|channel| (channel.kind(), channel))
            .collect();

        Ok(Self {
            rules,
            channels,
            environment,
            default_cooldown: DEFAULT_COOLDOWN,
            history: Mutex::new(AlertHistory::default()),
            failed_dispatches: AtomicU64::new(0),
            housekeeping: Mutex::new(None),
            logger,
        })
    }

    pub fn with_default_cooldown(mut self, cooldown: Duration) -> Self {
        self.default_cooldown = cooldown;
        self
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn rule(&self, key: RuleKey) -> Option<&AlertRule> {
        self.rules.iter().find(|rule| rule.key == key)
    }

    fn cooldown_for(&self, alert: &Alert) -> Duration {
        alert
            .rule
            .and_then(|key| self.rule(key))
            .map(|rule| rule.cooldown)
            .unwrap_or(self.default_cooldown)
    }

    fn history(&self) -> std::sync::MutexGuard<'_, AlertHistory> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =================================================================================
    // DISPATCH
    // =================================================================================

    /// Sends `alert` to every requested channel at once unless the same alert went
    /// out within its cooldown. Channel failures are logged and reported, never
    /// returned as errors.
    #[instrument(skip(self, alert), fields(alert = %alert.identity()))]
    pub async fn send_alert(&self, alert: &Alert, channels: &[ChannelKind]) -> DispatchReport {
        let key = alert.identity();
        let cooldown = self.cooldown_for(alert);
        let now = Instant::now();

        {
            let mut history = self.history();
            if let Some(last) = history.last_alert_time.get(&key) {
                if now.duration_since(*last) <= cooldown {
                    drop(history);
                    self.logger.debug(
                        "Alert suppressed by cooldown",
                        Some(json!({ "alert": key, "cooldown_ms": cooldown.as_millis() as u64 })),
                    );
                    return DispatchReport::suppressed();
                }
            }
            history.last_alert_time.insert(key.clone(), now);
            *history.alert_counts.entry(key.clone()).or_insert(0) += 1;
        }

        let mut report = DispatchReport::default();
        let mut attempts = Vec::new();
        for kind in channel_set(channels) {
            match self.channels.get(&kind) {
                Some(channel) if channel.is_configured() => attempts.push(channel.clone()),
                _ => {
                    self.logger.debug(
                        "Alert channel not configured, skipping",
                        Some(json!({ "channel": kind, "alert": key })),
                    );
                    report.skipped.push(kind);
                }
            }
        }

        let outcomes = join_all(attempts.iter().map(|channel| channel.send(alert))).await;
        for (channel, outcome) in attempts.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered.push(channel.kind()),
                Err(e) => {
                    self.logger.warn(
                        "Alert channel dispatch failed",
                        Some(json!({
                            "channel": channel.kind(),
                            "alert": key,
                            "error": e.to_string(),
                        })),
                    );
                    report.failed.push(channel.kind());
                }
            }
        }

        if report.is_blackout() {
            self.failed_dispatches.fetch_add(1, Ordering::Relaxed);
            self.logger.error(
                "Alerting blackout: every channel failed",
                Some(json!({
                    "alert": key,
                    "title": alert.title,
                    "severity": alert.severity,
                    "failed": report.failed,
                })),
            );
        }

        report
    }

    /// Channels for an ad-hoc alert of the given severity in this environment.
    pub fn channels_for(&self, severity: Severity) -> Vec<ChannelKind> {
        if !self.environment.is_production() {
            return vec![ChannelKind::Console];
        }
        match severity {
            Severity::Critical => vec![ChannelKind::Slack, ChannelKind::Email, ChannelKind::PagerDuty],
            Severity::High => vec![ChannelKind::Slack, ChannelKind::Email],
            Severity::Medium | Severity::Low => vec![ChannelKind::Slack],
        }
    }

    pub async fn notify(
        &self,
        title: &str,
        message: &str,
        severity: Severity,
        metadata: Option<Value>,
    ) -> DispatchReport {
        let alert = Alert::new(title, message, severity, metadata);
        let channels = self.channels_for(severity);
        self.send_alert(&alert, &channels).await
    }

    /// Raises the alert for a rule whose condition `value` meets. Returns `None`
    /// for an unknown rule or a value that does not breach it.
    pub async fn notify_rule(
        &self,
        key: RuleKey,
        value: f64,
        metadata: Option<Value>,
    ) -> Option<DispatchReport> {
        let rule = self.rule(key)?;
        if !rule.is_breached(value) {
            return None;
        }

        let message = format!(
            "{} is {} (threshold {})",
            rule.name, value, rule.threshold
        );
        let mut details = json!({ "value": value, "threshold": rule.threshold });
        if let (Some(extra), Some(map)) = (metadata, details.as_object_mut()) {
            map.insert("context".to_string(), extra);
        }

        let alert = Alert::new(&rule.name, &message, rule.severity, Some(details)).for_rule(key);
        let channels: Vec<ChannelKind> = if self.environment.is_production() {
            rule.channels.iter().copied().collect()
        } else {
            vec![ChannelKind::Console]
        };
        Some(self.send_alert(&alert, &channels).await)
    }

    // =================================================================================
    // STATISTICS & HOUSEKEEPING
    // =================================================================================

    pub fn get_statistics(&self) -> AlertStatistics {
        let history = self.history();
        AlertStatistics {
            total_alerts: history.alert_counts.values().sum(),
            distinct_alerts: history.alert_counts.len(),
            per_alert: history
                .alert_counts
                .iter()
                .map(|(key, count)| (key.clone(), *count))
                .collect(),
            failed_dispatches: self.failed_dispatches.load(Ordering::Relaxed),
        }
    }

    pub fn reset_statistics(&self) {
        let mut history = self.history();
        history.last_alert_time.clear();
        history.alert_counts.clear();
        drop(history);
        self.failed_dispatches.store(0, Ordering::Relaxed);
        self.logger.info("Alert statistics reset", None);
    }

    /// Forgets alerts idle for longer than their cooldown. Returns how many.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let cooldown_of = |key: &str| {
            self.rules
                .iter()
                .find(|rule| rule.key.as_str() == key)
                .map(|rule| rule.cooldown)
                .unwrap_or(self.default_cooldown)
        };

        let mut history = self.history();
        let expired: Vec<String> = history
            .last_alert_time
            .iter()
            .filter(|(key, last)| now.duration_since(**last) > cooldown_of(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            history.last_alert_time.remove(key);
            history.alert_counts.remove(key);
        }
        expired.len()
    }

    pub fn start_housekeeping(self: &Arc<Self>, every: Duration) {
        let mut slot = self
            .housekeeping
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            self.logger.warn("Alert housekeeping already running", None);
            return;
        }

        let manager = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let pruned = manager.prune_expired();
                if pruned > 0 {
                    manager.logger.debug(
                        "Pruned idle alert history",
                        Some(json!({ "pruned": pruned })),
                    );
                }
            }
        }));
    }

    pub fn stop_housekeeping(&self) {
        let handle = self
            .housekeeping
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for AlertManager {
    fn drop(&mut self) {
        self.stop_housekeeping();
    }
}
