use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// =====================================================================================
// ENVIRONMENT & LOG LEVEL
// =====================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::InvalidValue {
                key: "APP_ENV",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered so that `level >= min_level` decides whether a record is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(ConfigError::InvalidValue {
                key: "LOG_LEVEL",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

// =====================================================================================
// APPLICATION CONFIG
// =====================================================================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub log_level: LogLevel,
    pub port: u16,

    pub redis_url: Option<String>,
    pub redis_connect_timeout_ms: u64,
    pub redis_command_timeout_ms: u64,

    pub rate_limit_max_requests: u64,
    pub rate_limit_window_ms: u64,
    pub rate_limit_degrade_policy: String,

    pub metrics_flush_interval_ms: u64,

    pub slack_webhook_url: Option<String>,
    pub alert_email_to: Option<String>,
    pub alert_email_from: String,
    pub email_api_key: Option<String>,
    pub email_api_url: String,
    pub pagerduty_integration_key: Option<String>,
    pub pagerduty_events_url: String,
    /// Bearer token for operator-only monitoring routes; unset disables them.
    pub monitoring_admin_token: Option<String>,
}

pub const DEFAULT_PRODUCTION_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";
pub const DEFAULT_PAGERDUTY_EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            log_level: LogLevel::Info,
            port: 3000,
            redis_url: None,
            redis_connect_timeout_ms: 10_000,
            redis_command_timeout_ms: 5_000,
            rate_limit_max_requests: 100,
            rate_limit_window_ms: 60_000,
            rate_limit_degrade_policy: "fail-open".to_string(),
            metrics_flush_interval_ms: 60_000,
            slack_webhook_url: None,
            alert_email_to: None,
            alert_email_from: "alerts@nestly.app".to_string(),
            email_api_key: None,
            email_api_url: DEFAULT_EMAIL_API_URL.to_string(),
            pagerduty_integration_key: None,
            pagerduty_events_url: DEFAULT_PAGERDUTY_EVENTS_URL.to_string(),
            monitoring_admin_token: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let environment = env::var("APP_ENV")
            .or_else(|_| env::var("NODE_ENV"))
            .ok()
            .and_then(|value| {
                value.parse().map_err(|e| warn!("{}, using development", e)).ok()
            })
            .unwrap_or(defaults.environment);

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|value| value.parse().map_err(|e| warn!("{}, using INFO", e)).ok())
            .unwrap_or(defaults.log_level);

        let config = Self {
            environment,
            log_level,
            port: parse_or("PORT", defaults.port),
            redis_url: optional("REDIS_URL"),
            redis_connect_timeout_ms: parse_or(
                "REDIS_CONNECT_TIMEOUT_MS",
                defaults.redis_connect_timeout_ms,
            ),
            redis_command_timeout_ms: parse_or(
                "REDIS_COMMAND_TIMEOUT_MS",
                defaults.redis_command_timeout_ms,
            ),
            rate_limit_max_requests: parse_or(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            ),
            rate_limit_window_ms: parse_or("RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window_ms),
            rate_limit_degrade_policy: optional("RATE_LIMIT_DEGRADE_POLICY")
                .unwrap_or(defaults.rate_limit_degrade_policy),
            metrics_flush_interval_ms: parse_or(
                "METRICS_FLUSH_INTERVAL_MS",
                defaults.metrics_flush_interval_ms,
            ),
            slack_webhook_url: optional("SLACK_WEBHOOK_URL"),
            alert_email_to: optional("ALERT_EMAIL_TO"),
            alert_email_from: optional("ALERT_EMAIL_FROM").unwrap_or(defaults.alert_email_from),
            email_api_key: optional("EMAIL_API_KEY"),
            email_api_url: optional("EMAIL_API_URL").unwrap_or(defaults.email_api_url),
            pagerduty_integration_key: optional("PAGERDUTY_INTEGRATION_KEY"),
            pagerduty_events_url: optional("PAGERDUTY_EVENTS_URL")
                .unwrap_or(defaults.pagerduty_events_url),
            monitoring_admin_token: optional("MONITORING_ADMIN_TOKEN"),
        };

        if !config.is_cache_configured() {
            debug!("REDIS_URL not set, cache disabled outside production");
        }

        config
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }

    pub fn is_cache_configured(&self) -> bool {
        self.redis_url.is_some()
    }

    /// Resolved backend URL: explicit value, or the local default in production only.
    pub fn cache_url(&self) -> Option<String> {
        match &self.redis_url {
            Some(url) => Some(url.clone()),
            None if self.is_production() => Some(DEFAULT_PRODUCTION_REDIS_URL.to_string()),
            None => None,
        }
    }

    pub fn is_slack_configured(&self) -> bool {
        self.slack_webhook_url.is_some()
    }

    pub fn is_email_configured(&self) -> bool {
        self.alert_email_to.is_some() && self.email_api_key.is_some()
    }

    pub fn is_pagerduty_configured(&self) -> bool {
        self.pagerduty_integration_key.is_some()
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
