//! Request fingerprints and item identifiers.
//!
//! A fingerprint is the SHA-1 of `target:canon(payload):canon(headers)`,
//! where `canon` is compact JSON with object keys sorted at every level.
//! Archives index entries by fingerprint, so this encoding must never
//! change: archives written by one build have to be readable by the next.

use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::error::IdentityError;

/// Canonical JSON encoding: sorted keys, no whitespace.
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
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn sha1_hex(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Fingerprint of a request signature.
pub fn fingerprint(target: &str, payload: &Value, headers: &Value) -> String {
    let content = format!(
        "{}:{}:{}",
        target,
        canonical_json(payload),
        canonical_json(headers)
    );
    sha1_hex(content.as_bytes())
}

/// Global identifier of an item: SHA-1 of the `:`-joined values.
///
/// Every value must be non-empty.
pub fn uuid(values: &[&str]) -> Result<String, IdentityError> {
    if values.is_empty() || values.iter().any(|v| v.is_empty()) {
        return Err(IdentityError::Empty);
    }
    Ok(sha1_hex(values.join(":").as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [1, {"y": 2, "x": null}], "c": "s"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"s","z":[1,{"x":null,"y":2}]},"b":1}"#
        );
    }

    #[test]
    fn test_fingerprint_ignores_insertion_order() {
        let mut first = serde_json::Map::new();
        first.insert("page".to_string(), json!(2));
        first.insert("ordering".to_string(), json!("updated"));
        let mut second = serde_json::Map::new();
        second.insert("ordering".to_string(), json!("updated"));
        second.insert("page".to_string(), json!(2));

        let a = fingerprint("http://x/api", &Value::Object(first), &json!({}));
        let b = fingerprint("http://x/api", &Value::Object(second), &json!({}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha1("http://x/api:{\"id\":1}:{}")
        let expected = sha1_hex(br#"http://x/api:{"id":1}:{}"#);
        assert_eq!(fingerprint("http://x/api", &json!({"id": 1}), &json!({})), expected);
    }

    #[test]
    fn test_fingerprint_distinguishes_fields() {
        let a = fingerprint("http://x", &json!({"id": 1}), &json!({}));
        let b = fingerprint("http://x", &json!({}), &json!({"id": 1}));
        let c = fingerprint("http://x", &json!({"id": 2}), &json!({}));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_uuid() {
        assert_eq!(
            uuid(&["1", "2", "3", "4"]).unwrap(),
            "e7b71c81f5a0723e2237f157dba81777ce7c6c21"
        );
        assert_eq!(
            uuid(&["http://example.com/", "1234567"]).unwrap(),
            "47509b2f0d4ffc513ca9230838a69aa841d7f055"
        );
    }

    #[test]
    fn test_uuid_empty_value() {
        assert_eq!(uuid(&["http://example.com/", ""]), Err(IdentityError::Empty));
        assert_eq!(uuid(&[]), Err(IdentityError::Empty));
    }
}
