use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::models::LogEntry;
use shared_config::LogLevel;

pub trait LogSink: Send + Sync {
    fn emit(&self, entry: &LogEntry);
}

/// Forwards entries into the process `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, entry: &LogEntry) {
        let context = entry
            .context
            .as_ref()
            .map(|context| context.to_string())
            .unwrap_or_default();

        match entry.level {
            LogLevel::Debug => debug!(
                environment = %entry.environment,
                context = %context,
                "{}", entry.message
            ),
            LogLevel::Info => info!(
                environment = %entry.environment,
                context = %context,
                "{}", entry.message
            ),
            LogLevel::Warn => warn!(
                environment = %entry.environment,
                context = %context,
                "{}", entry.message
            ),
            LogLevel::Error => error!(
                environment = %entry.environment,
                context = %context,
                "{}", entry.message
            ),
        }
    }
}

/// Keeps every entry in memory. Used by tests across the workspace.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn entries_at(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .collect()
    }

    pub fn contains(&self, level: LogLevel, message_fragment: &str) -> bool {
        self.entries()
            .iter()
            .any(|entry| entry.level == level && entry.message.contains(message_fragment))
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
    }
}
