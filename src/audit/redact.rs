//! Recursive field redaction (§4.8)
//!
//! Grounded on the teacher's `audit.rs` privacy-aware logging (it hashes
//! identifiers with blake3 before emission); this pipeline instead replaces
//! sensitive values outright, per spec.md's `"***REDACTED***"` contract.

use serde_json::Value;

const REDACTED: &str = "***REDACTED***";
const SENSITIVE_MARKERS: &[&str] = &["token", "secret", "password", "apikey", "ksn", "pin"];

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Recursively replace every string-keyed value whose key name matches a
/// sensitive marker with `"***REDACTED***"`, over objects and arrays alike.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Apply [`redact`] to an optional field, leaving `None` untouched.
pub fn redact_opt(value: &Option<Value>) -> Option<Value> {
    value.as_ref().map(redact)
}
