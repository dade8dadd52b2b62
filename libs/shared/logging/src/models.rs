use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use shared_config::{Environment, LogLevel};

/// A single emitted record. Built per call, handed to the sink, then dropped.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        environment: Environment,
        context: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            environment,
            context,
        }
    }

    /// Looks up a top-level context field, mostly for assertions.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.context.as_ref().and_then(|context| context.get(key))
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"level\":\"{}\",\"message\":\"log entry could not be serialized\"}}",
                self.level
            )
        })
    }
}
