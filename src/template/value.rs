//! Value plumbing for the template engine: path lookup, display conversion,
//! truthiness and stable hashing over JSON trees.

use std::hash::{Hash, Hasher};

use serde_json::Value;

/// Resolve a dotted path (`metadata.name`, `spec.containers.0.image`)
/// against a JSON tree. A missing segment yields `None`, never an error —
/// absent fields are an everyday condition in Kubernetes objects.
pub fn lookup<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Convert a value to its cell text. Null renders empty, scalars render
/// plainly, arrays join their elements, objects fall back to compact JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(display)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Template truthiness: null, false, zero, the empty string, `"false"`,
/// `"0"` and empty collections are false; everything else is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Coerce a value to a number for aggregation and numeric-aware sorting.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Stable in-process hash over a JSON tree, used as the data component of
/// render-cache keys. Object keys hash in map order, which serde_json keeps
/// deterministic.
pub fn hash_value(value: &Value) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hash_into(value, &mut hasher);
    hasher.finish()
}

fn hash_into<H: Hasher>(value: &Value, hasher: &mut H) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            n.to_string().hash(hasher);
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_into(item, hasher);
            }
        }
        Value::Object(map) => {
            5u8.hash(hasher);
            map.len().hash(hasher);
            for (k, v) in map {
                k.hash(hasher);
                hash_into(v, hasher);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_nested_and_index() {
        let v = json!({"spec": {"containers": [{"image": "nginx:1.25"}]}});
        let path = ["spec", "containers", "0", "image"].map(String::from);
        assert_eq!(lookup(&v, &path), Some(&json!("nginx:1.25")));
    }

    #[test]
    fn lookup_missing_is_none() {
        let v = json!({"metadata": {}});
        let path = ["metadata", "labels", "app"].map(String::from);
        assert_eq!(lookup(&v, &path), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(display(&Value::Null), "");
        assert_eq!(display(&json!("x")), "x");
        assert_eq!(display(&json!(3)), "3");
        assert_eq!(display(&json!(["a", "b"])), "a,b");
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!("false")));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!("Running")));
        assert!(truthy(&json!(2)));
        assert!(truthy(&json!(["x"])));
    }

    #[test]
    fn hash_is_stable_and_discriminating() {
        let a = json!({"a": 1, "b": [true, "x"]});
        let b = json!({"a": 1, "b": [true, "x"]});
        let c = json!({"a": 1, "b": [true, "y"]});
        assert_eq!(hash_value(&a), hash_value(&b));
        assert_ne!(hash_value(&a), hash_value(&c));
    }
}
