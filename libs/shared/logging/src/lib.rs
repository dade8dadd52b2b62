// =====================================================================================
// SHARED LOGGING - STRUCTURED LOGGER WITH SENSITIVE-FIELD REDACTION
// =====================================================================================
//
// Every cell logs through a `StructuredLogger` handed to it by the composition root:
// - Level gating against a minimum read once from configuration
// - Recursive, depth-bounded redaction of sensitive context keys
// - One structured record per call, delivered to a pluggable sink
//
// =====================================================================================

pub mod logger;
pub mod models;
pub mod redact;
pub mod sink;

pub use logger::{error_context, StructuredLogger};
pub use models::LogEntry;
pub use redact::{redact, MAX_DEPTH, MAX_DEPTH_MARKER, REDACTED, SENSITIVE_KEYS};
pub use sink::{LogSink, MemorySink, TracingSink};

pub use shared_config::{Environment, LogLevel};
