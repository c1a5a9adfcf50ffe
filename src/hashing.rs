//! Canonical JSON serialization and content hashing.
//!
//! Hashes are SHA-256 over a canonical JSON rendering: object keys sorted
//! lexicographically, sequences kept in declared order, timestamps already
//! rendered as RFC 3339 strings by the typed layer above.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value canonically: object keys sorted, no extra whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => {
            out.push_str(&other.to_string());
        }
    }
}

/// Hash content for privacy-preserving storage.
///
/// SHA-256 over the canonical JSON rendering, lowercase hex.
pub fn hash_content(content: &Value) -> String {
    hash_str(&canonical_json(content))
}

/// SHA-256 of a raw string, lowercase hex.
pub fn hash_str(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Create a human-readable summary of content.
///
/// Truncates long strings and shows structure for composite values.
pub fn summarize_content(content: &Value, max_length: usize) -> String {
    match content {
        Value::Null => "<none>".to_string(),
        Value::String(s) => truncate(s, max_length),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
            let keys_str = format!("{:?}", keys);
            if keys_str.len() > max_length {
                truncate(&keys_str, max_length)
            } else {
                format!("dict with keys: {}", keys_str)
            }
        }
        Value::Array(items) => format!("list of {} items", items.len()),
        Value::Bool(_) => "<bool>".to_string(),
        Value::Number(_) => "<number>".to_string(),
    }
}

fn truncate(s: &str, max_length: usize) -> String {
    if s.chars().count() <= max_length {
        s.to_string()
    } else {
        let prefix: String = s.chars().take(max_length).collect();
        format!("{}...", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": 2, "c": {"z": 1, "y": 2}});
        assert_eq!(canonical_json(&value), r#"{"a":2,"b":1,"c":{"y":2,"z":1}}"#);
    }

    #[test]
    fn test_canonical_json_preserves_array_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonical_json(&value), "[3,1,2]");
    }

    #[test]
    fn test_hash_content_deterministic() {
        let a = json!({"x": 1, "y": "two"});
        let b = json!({"y": "two", "x": 1});
        assert_eq!(hash_content(&a), hash_content(&b));
    }

    #[test]
    fn test_hash_content_differs() {
        assert_ne!(hash_content(&json!({"a": 1})), hash_content(&json!({"a": 2})));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let h = hash_content(&json!("hello"));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_summarize_string_truncation() {
        let long = "a".repeat(300);
        let summary = summarize_content(&json!(long), 200);
        assert_eq!(summary.len(), 203);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_summarize_dict() {
        let summary = summarize_content(&json!({"task": 1, "agent": 2}), 200);
        assert!(summary.starts_with("dict with keys:"));
        assert!(summary.contains("task"));
    }

    #[test]
    fn test_summarize_list() {
        assert_eq!(summarize_content(&json!([1, 2, 3]), 200), "list of 3 items");
    }

    #[test]
    fn test_summarize_null_and_scalars() {
        assert_eq!(summarize_content(&Value::Null, 200), "<none>");
        assert_eq!(summarize_content(&json!(true), 200), "<bool>");
        assert_eq!(summarize_content(&json!(42), 200), "<number>");
    }
}
