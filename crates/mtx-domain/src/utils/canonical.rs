//! Canonical JSON serialization.
//!
//! Cache keys are derived from tool parameters, so two parameter maps that
//! differ only in key order must serialize identically. `serde_json` keeps
//! object keys in insertion order; this module re-emits values with object
//! keys sorted lexicographically at every nesting level.

use serde_json::{Map, Value};

/// Serialize a JSON value with all object keys sorted lexicographically.
///
/// Arrays keep their element order; only object key order is normalized.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    sort_value(value).to_string()
}

/// Canonical cache key for a tool invocation: `tool_id + ":" + canonical(params)`.
#[must_use]
pub fn invocation_key(tool_id: &str, params: &Map<String, Value>) -> String {
    format!(
        "{tool_id}:{}",
        canonical_json(&Value::Object(params.clone()))
    )
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), sort_value(inner));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn nested_objects_are_sorted() {
        let a = json!({"outer": {"z": 1, "a": {"y": 2, "x": 3}}});
        let b = json!({"outer": {"a": {"x": 3, "y": 2}, "z": 1}});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn array_order_is_preserved() {
        let a = json!({"items": [3, 1, 2]});
        let b = json!({"items": [1, 2, 3]});
        assert_ne!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn invocation_keys_match_for_equivalent_params() {
        let a = json!({"a": 1, "b": 2}).as_object().cloned().unwrap();
        let b = json!({"b": 2, "a": 1}).as_object().cloned().unwrap();
        assert_eq!(invocation_key("tool", &a), invocation_key("tool", &b));
    }
}
