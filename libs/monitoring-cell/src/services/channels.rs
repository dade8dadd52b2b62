// =====================================================================================
// NOTIFICATION CHANNELS
// =====================================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::models::{Alert, AlertError, ChannelKind, Severity};
use shared_config::AppConfig;
use shared_logging::{LogLevel, StructuredLogger};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const ALERT_SOURCE: &str = "nestly";

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Channels missing credentials are skipped, not failed.
    fn is_configured(&self) -> bool;

    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

fn http_client() -> Client {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

async fn post_json(
    channel: ChannelKind,
    request: reqwest::RequestBuilder,
    payload: &serde_json::Value,
) -> Result<(), AlertError> {
    let response = request
        .json(payload)
        .send()
        .await
        .map_err(|source| AlertError::Http { channel, source })?;

    if !response.status().is_success() {
        return Err(AlertError::Status {
            channel,
            status: response.status().as_u16(),
        });
    }
    Ok(())
}

/// Every configured channel for this process.
pub fn channels_from_config(
    config: &AppConfig,
    logger: Arc<StructuredLogger>,
) -> Vec<Arc<dyn NotificationChannel>> {
    vec![
        Arc::new(ConsoleChannel::new(logger)),
        Arc::new(SlackChannel::new(config.slack_webhook_url.clone())),
        Arc::new(EmailChannel::new(
            config.email_api_url.clone(),
            config.email_api_key.clone(),
            config.alert_email_to.clone(),
            config.alert_email_from.clone(),
        )),
        Arc::new(PagerDutyChannel::new(
            config.pagerduty_events_url.clone(),
            config.pagerduty_integration_key.clone(),
        )),
    ]
}

// =====================================================================================
// CONSOLE
// =====================================================================================

pub struct ConsoleChannel {
    logger: Arc<StructuredLogger>,
}

impl ConsoleChannel {
    pub fn new(logger: Arc<StructuredLogger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Console
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let level = match alert.severity {
            Severity::Critical => LogLevel::Error,
            Severity::High | Severity::Medium => LogLevel::Warn,
            Severity::Low => LogLevel::Info,
        };
        self.logger.log(
            level,
            &format!("{} ALERT: {}", alert.severity.emoji(), alert.title),
            Some(json!({
                "alert_id": alert.id,
                "rule": alert.rule,
                "severity": alert.severity,
                "message": alert.message,
                "metadata": alert.metadata,
            })),
        );
        Ok(())
    }
}

// =====================================================================================
// SLACK
// =====================================================================================

pub struct SlackChannel {
    webhook_url: Option<String>,
    client: Client,
}

impl SlackChannel {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            client: http_client(),
        }
    }

    pub fn payload(alert: &Alert) -> serde_json::Value {
        json!({
            "text": format!("{} {}", alert.severity.emoji(), alert.title),
            "attachments": [{
                "color": alert.severity.color(),
                "title": alert.title,
                "text": alert.message,
                "fields": [
                    { "title": "Severity", "value": alert.severity.as_str(), "short": true },
                    { "title": "Alert ID", "value": alert.id, "short": true },
                    {
                        "title": "Time",
                        "value": alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                        "short": true
                    }
                ],
                "footer": "Nestly Monitoring",
                "ts": alert.timestamp.timestamp()
            }]
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let Some(url) = &self.webhook_url else {
            return Ok(());
        };
        post_json(self.kind(), self.client.post(url), &Self::payload(alert)).await
    }
}

// =====================================================================================
// EMAIL (JSON MAIL API)
// =====================================================================================

/// Escapes text for an HTML body or attribute.
pub(crate) fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub struct EmailChannel {
    api_url: String,
    api_key: Option<String>,
    to: Option<String>,
    from: String,
    client: Client,
}

impl EmailChannel {
    pub fn new(api_url: String, api_key: Option<String>, to: Option<String>, from: String) -> Self {
        Self {
            api_url,
            api_key,
            to,
            from,
            client: http_client(),
        }
    }

    pub fn payload(&self, alert: &Alert) -> serde_json::Value {
        let metadata = alert
            .metadata
            .as_ref()
            .and_then(|metadata| serde_json::to_string_pretty(metadata).ok())
            .unwrap_or_default();

        json!({
            "from": self.from,
            "to": [self.to],
            "subject": format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.title),
            "html": format!(
                "<h2 style=\"color:{}\">{} {}</h2><p>{}</p><pre>{}</pre><p>Alert ID: {}<br/>Time: {}</p>",
                alert.severity.color(),
                alert.severity.emoji(),
                escape_html(&alert.title),
                escape_html(&alert.message),
                escape_html(&metadata),
                escape_html(&alert.id),
                alert.timestamp.to_rfc3339(),
            ),
        })
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.to.is_some()
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let Some(api_key) = &self.api_key else {
            return Ok(());
        };
        let request = self.client.post(&self.api_url).bearer_auth(api_key);
        post_json(self.kind(), request, &self.payload(alert)).await
    }
}

// =====================================================================================
// PAGERDUTY (EVENTS API V2)
// =====================================================================================

pub struct PagerDutyChannel {
    events_url: String,
    integration_key: Option<String>,
    client: Client,
}

impl PagerDutyChannel {
    pub fn new(events_url: String, integration_key: Option<String>) -> Self {
        Self {
            events_url,
            integration_key,
            client: http_client(),
        }
    }

    fn event_severity(severity: Severity) -> &'static str {
        match severity {
            Severity::Critical => "critical",
            Severity::High => "error",
            Severity::Medium => "warning",
            Severity::Low => "info",
        }
    }

    pub fn payload(routing_key: &str, alert: &Alert) -> serde_json::Value {
        json!({
            "routing_key": routing_key,
            "event_action": "trigger",
            "dedup_key": alert.identity(),
            "payload": {
                "summary": format!("{}: {}", alert.title, alert.message),
                "severity": Self::event_severity(alert.severity),
                "source": ALERT_SOURCE,
                "timestamp": alert.timestamp.to_rfc3339(),
                "custom_details": alert.metadata,
            }
        })
    }
}

#[async_trait]
impl NotificationChannel for PagerDutyChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::PagerDuty
    }

    fn is_configured(&self) -> bool {
        self.integration_key.is_some()
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let Some(key) = &self.integration_key else {
            return Ok(());
        };
        post_json(
            self.kind(),
            self.client.post(&self.events_url),
            &Self::payload(key, alert),
        )
        .await
    }
}
