//! Secret redaction applied to every structured field before it is written.

use serde_json::{Map, Value};

/// Placeholder written in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

const DENYLIST_KEYS: [&str; 11] = [
    "token",
    "session_key",
    "sk",
    "api_sig",
    "secret",
    "password",
    "authorization",
    "cookie",
    "private_key",
    "master_key",
    "csrf",
];

/// Returns true when a field name denotes a credential.
///
/// `sk` only matches exactly; the other entries match as substrings so that
/// `access_token`, `shared_secret` and friends are covered.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    if lower == "sk" {
        return true;
    }
    DENYLIST_KEYS
        .iter()
        .filter(|entry| **entry != "sk")
        .any(|entry| lower.contains(entry))
}

/// Redact a structured value recursively.
pub fn redact_value(key: &str, value: &Value) -> Value {
    if is_sensitive_key(key) {
        return Value::String(REDACTED.to_string());
    }

    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), redact_value(k, v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(key, v)).collect()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_keys() {
        assert!(is_sensitive_key("session_key"));
        assert!(is_sensitive_key("token"));
        assert!(is_sensitive_key("api_sig"));
        assert!(is_sensitive_key("shared_secret"));
        assert!(is_sensitive_key("SK"));
        assert!(!is_sensitive_key("display_name"));
        assert!(!is_sensitive_key("port"));
        assert!(!is_sensitive_key("task"));
    }

    #[test]
    fn test_redact_nested_object() {
        let value = serde_json::json!({
            "display_name": "alice",
            "session": { "session_key": "sk_1" },
        });
        let redacted = redact_value("payload", &value);
        assert_eq!(redacted["display_name"], "alice");
        assert_eq!(redacted["session"]["session_key"], REDACTED);
    }

    #[test]
    fn test_redact_top_level_key() {
        let value = Value::String("abc123".to_string());
        assert_eq!(redact_value("token", &value), Value::String(REDACTED.into()));
    }
}
