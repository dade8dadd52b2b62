pub mod alerts;
pub mod channels;
pub mod metrics;
pub mod track;

pub use alerts::{default_rules, AlertManager, DEFAULT_COOLDOWN};
pub use channels::{
    ConsoleChannel, EmailChannel, NotificationChannel, PagerDutyChannel, SlackChannel,
};
pub use metrics::{percentile, summarize, MetricsCollector, DEFAULT_FLUSH_INTERVAL};
