//! Recursive flattening of nested documents.
//!
//! Every scalar leaf is named by the full path of its ancestors joined with a
//! separator, at every depth and for every document alike. Array elements are
//! named by their index.

use serde_json::Value;

/// Flatten `document` into `(path, scalar)` pairs in document order.
///
/// A bare scalar document has no name and yields nothing.
pub fn flatten(document: &Value, separator: &str) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    descend(None, document, separator, &mut out);
    out
}

fn descend(prefix: Option<&str>, value: &Value, separator: &str, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let name = qualify(prefix, key, separator);
                descend(Some(&name), child, separator, out);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let name = qualify(prefix, &index.to_string(), separator);
                descend(Some(&name), child, separator, out);
            }
        }
        scalar => {
            if let Some(name) = prefix {
                out.push((name.to_string(), scalar.clone()));
            }
        }
    }
}

fn qualify(prefix: Option<&str>, key: &str, separator: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}{separator}{key}"),
        None => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(pairs: Vec<(String, Value)>) -> std::collections::BTreeMap<String, Value> {
        pairs.into_iter().collect()
    }

    #[test]
    fn test_nested_object() {
        let flat = as_map(flatten(&json!({"a": {"b": 1}, "c": 2}), "·"));
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["a·b"], json!(1));
        assert_eq!(flat["c"], json!(2));
    }

    #[test]
    fn test_full_path_at_every_depth() {
        let doc = json!({"from": {"location": {"city": "Oslo", "geo": {"lat": 59.9}}}});
        let flat = as_map(flatten(&doc, " "));
        assert_eq!(flat["from location city"], json!("Oslo"));
        assert_eq!(flat["from location geo lat"], json!(59.9));
    }

    #[test]
    fn test_same_rule_for_every_document() {
        let docs = [json!({"a": {"b": 1}, "c": 2}), json!({"x": 0}), json!({"a": {"b": 1}, "c": 2})];
        let first = flatten(&docs[0], ".");
        let last = flatten(&docs[2], ".");
        assert_eq!(first, last);
    }

    #[test]
    fn test_arrays_use_index_names() {
        let flat = as_map(flatten(&json!({"tags": ["rust", {"name": "cache"}]}), "."));
        assert_eq!(flat["tags.0"], json!("rust"));
        assert_eq!(flat["tags.1.name"], json!("cache"));
    }

    #[test]
    fn test_scalars_kept_including_null() {
        let flat = as_map(flatten(&json!({"n": null, "b": false, "s": ""}), "."));
        assert_eq!(flat.len(), 3);
        assert_eq!(flat["n"], Value::Null);
    }

    #[test]
    fn test_empty_containers_and_bare_scalars() {
        assert!(flatten(&json!({"empty": {}, "none": []}), ".").is_empty());
        assert!(flatten(&json!(42), ".").is_empty());
    }
}
