use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::models::LogEntry;
use crate::redact::redact;
use crate::sink::{LogSink, TracingSink};
use shared_config::{AppConfig, Environment, LogLevel};

// =====================================================================================
// STRUCTURED LOGGER
// =====================================================================================

pub struct StructuredLogger {
    min_level: LogLevel,
    environment: Environment,
    sink: Arc<dyn LogSink>,
}

impl std::fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("min_level", &self.min_level)
            .field("environment", &self.environment)
            .finish()
    }
}

impl StructuredLogger {
    /// Logger writing into the `tracing` subscriber installed by the binary.
    pub fn new(config: &AppConfig) -> Self {
        Self::with_sink(config.log_level, config.environment, Arc::new(TracingSink))
    }

    pub fn with_sink(
        min_level: LogLevel,
        environment: Environment,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            min_level,
            environment,
            sink,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Emits one record. Never panics and never returns an error: if the context
    /// cannot be redacted a minimal record without it is emitted instead.
    pub fn log(&self, level: LogLevel, message: &str, context: Option<Value>) {
        if !self.enabled(level) {
            return;
        }

        let built = panic::catch_unwind(AssertUnwindSafe(|| {
            LogEntry::new(level, message, self.environment, context.as_ref().map(redact))
        }));

        let entry = built.unwrap_or_else(|_| {
            LogEntry::new(
                level,
                message,
                self.environment,
                Some(json!({ "logging_error": "context could not be formatted" })),
            )
        });

        let sink = &self.sink;
        if panic::catch_unwind(AssertUnwindSafe(|| sink.emit(&entry))).is_err() {
            eprintln!("{}", entry.to_json_line());
        }
    }

    pub fn debug(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Debug, message, context);
    }

    pub fn info(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Info, message, context);
    }

    pub fn warn(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Warn, message, context);
    }

    pub fn error(&self, message: &str, context: Option<Value>) {
        self.log(LogLevel::Error, message, context);
    }

    // =================================================================================
    // CONVENIENCE WRAPPERS
    // =================================================================================

    pub fn log_request(&self, method: &str, url: &str, context: Option<Value>) {
        if !self.enabled(LogLevel::Info) {
            return;
        }
        let context = merge(json!({ "method": method, "url": url }), context);
        self.info(&format!("Incoming request {} {}", method, url), Some(context));
    }

    pub fn log_response(&self, method: &str, url: &str, status: u16, duration_ms: u64) {
        let level = match status {
            500..=u16::MAX => LogLevel::Error,
            400..=499 => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        if !self.enabled(level) {
            return;
        }

        self.log(
            level,
            &format!("{} {} {} - {}ms", method, url, status, duration_ms),
            Some(json!({
                "method": method,
                "url": url,
                "status": status,
                "duration_ms": duration_ms,
            })),
        );
    }

    pub fn log_db(
        &self,
        operation: &str,
        collection: &str,
        duration_ms: u64,
        context: Option<Value>,
    ) {
        if !self.enabled(LogLevel::Debug) {
            return;
        }
        let context = merge(
            json!({
                "operation": operation,
                "collection": collection,
                "duration_ms": duration_ms,
            }),
            context,
        );
        self.debug(
            &format!("Database {} on {}", operation, collection),
            Some(context),
        );
    }

    pub fn log_security(&self, event: &str, context: Option<Value>) {
        if !self.enabled(LogLevel::Warn) {
            return;
        }
        let context = merge(json!({ "security_event": event }), context);
        self.warn(&format!("Security event: {}", event), Some(context));
    }

    pub fn log_rate_limit(&self, identifier: &str, endpoint: &str) {
        if !self.enabled(LogLevel::Warn) {
            return;
        }
        self.warn(
            "Rate limit exceeded",
            Some(json!({ "identifier": identifier, "endpoint": endpoint })),
        );
    }

    pub fn log_auth(&self, event: &str, user_id: Option<&str>, context: Option<Value>) {
        if !self.enabled(LogLevel::Info) {
            return;
        }
        let context = merge(json!({ "auth_event": event, "user_id": user_id }), context);
        self.info(&format!("Auth: {}", event), Some(context));
    }

    pub fn log_performance(&self, operation: &str, duration_ms: u64, context: Option<Value>) {
        let level = if duration_ms > 1000 {
            LogLevel::Warn
        } else {
            LogLevel::Debug
        };
        if !self.enabled(level) {
            return;
        }

        let context = merge(
            json!({ "operation": operation, "duration_ms": duration_ms }),
            context,
        );
        let message = if level == LogLevel::Warn {
            format!("Slow operation: {} took {}ms", operation, duration_ms)
        } else {
            format!("{} completed in {}ms", operation, duration_ms)
        };
        self.log(level, &message, Some(context));
    }
}

/// Caller-supplied fields win over the wrapper's own; non-object extras land
/// under `extra`.
fn merge(base: Value, extra: Option<Value>) -> Value {
    let mut fields = match base {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };

    match extra {
        Some(Value::Object(extra)) => fields.extend(extra),
        Some(Value::Null) | None => {}
        Some(other) => {
            fields.insert("extra".to_string(), other);
        }
    }

    Value::Object(fields)
}

/// Structured view of an error for log context: type name, message, and the
/// `source()` chain outside production.
pub fn error_context<E>(error: &E, environment: Environment) -> Value
where
    E: std::error::Error + ?Sized,
{
    let mut context = json!({
        "name": std::any::type_name::<E>(),
        "message": error.to_string(),
    });

    if !environment.is_production() {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(Value::String(cause.to_string()));
            source = cause.source();
        }
        context["stack"] = Value::Array(chain);
    }

    context
}
