use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";
pub const MAX_DEPTH_MARKER: &str = "[MAX_DEPTH_EXCEEDED]";
pub const MAX_DEPTH: usize = 10;

/// Matched as substrings of the normalized key (lowercase, `_` and `-` removed),
/// so `api_key`, `X-Api-Key` and `userPassword` all hit.
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "apikey",
    "accesstoken",
    "refreshtoken",
    "authorization",
    "cookie",
    "creditcard",
    "ssn",
    "privatekey",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();

    SENSITIVE_KEYS
        .iter()
        .any(|sensitive| normalized.contains(sensitive))
}

/// Returns a copy of `value` with every sensitive key's value replaced.
pub fn redact(value: &Value) -> Value {
    redact_at(value, 0)
}

fn redact_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(MAX_DEPTH_MARKER.to_string());
    }

    match value {
        Value::Object(map) => {
            let mut redacted = Map::with_capacity(map.len());
            for (key, inner) in map {
                let replacement = if is_sensitive_key(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    redact_at(inner, depth + 1)
                };
                redacted.insert(key.clone(), replacement);
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(
            items.iter().map(|item| redact_at(item, depth + 1)).collect(),
        ),
        other => other.clone(),
    }
}
