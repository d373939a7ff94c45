//! Canonical JSON for block hashing.
//!
//! Hashes only agree across nodes (and across languages) if every node
//! serialises the hashed material identically. This module pins the form:
//! object keys sorted by UTF-16 code units, minimal string escaping, no
//! insignificant whitespace, integers without decoration - the RFC 8785
//! subset that matters for the block payloads we hash.
//!
//! Non-integer numbers are outside the contract: block patterns carry only
//! strings (pattern, category, severity tag, timestamp), and pinning a
//! cross-language float grammar buys nothing the hashed material ever uses.
//! Peers must not place floats in hashed payloads.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialises a JSON value canonically.
///
/// Semantically identical values produce byte-identical output:
///
/// ```rust
/// use guardian_ledger::canonical::canonical_json;
/// use serde_json::json;
///
/// assert_eq!(
///     canonical_json(&json!({"b": 1, "a": 2})),
///     canonical_json(&json!({"a": 2, "b": 1})),
/// );
/// assert_eq!(canonical_json(&json!({"a": 2, "b": 1})), r#"{"a":2,"b":1}"#);
/// ```
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        // Integer-and-string material only; integers print undecorated.
        // Floats are excluded from hashed payloads (see module docs).
        Value::Number(n) => n.to_string(),
        Value::String(s) => canonical_string(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| compare_utf16(a, b));
            let inner: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}:{}", canonical_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}

/// Lowercase hex SHA-256 of a byte string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Minimal escaping: `"`, `\` and control characters only.
fn canonical_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\x20' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Key ordering by UTF-16 code units (RFC 8785 §3.2.3). Equivalent to byte
/// order for ASCII keys.
fn compare_utf16(a: &str, b: &str) -> std::cmp::Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(true)), "true");
        assert_eq!(canonical_json(&json!(42)), "42");
        assert_eq!(canonical_json(&json!(-7)), "-7");
        assert_eq!(canonical_json(&json!("hi")), r#""hi""#);
    }

    #[test]
    fn test_integers_print_undecorated() {
        assert_eq!(canonical_json(&json!(0)), "0");
        assert_eq!(canonical_json(&json!(i64::MIN)), "-9223372036854775808");
        // Above i64::MAX still renders as a plain integer.
        assert_eq!(canonical_json(&json!(u64::MAX)), "18446744073709551615");
        assert_eq!(canonical_json(&json!({"index": 7})), r#"{"index":7}"#);
    }

    #[test]
    fn test_key_sorting() {
        let value = json!({"z": 1, "a": 2, "m": [3, {"y": 1, "x": 2}]});
        assert_eq!(canonical_json(&value), r#"{"a":2,"m":[3,{"x":2,"y":1}],"z":1}"#);
    }

    #[test]
    fn test_no_whitespace() {
        let value = json!({"a": [1, 2, 3], "b": {"c": "d"}});
        assert!(!canonical_json(&value).contains(' '));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(canonical_json(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(canonical_json(&json!("a\\b")), r#""a\\b""#);
        assert_eq!(canonical_json(&json!("line\nbreak")), r#""line\nbreak""#);
        assert_eq!(canonical_json(&json!("bell\u{07}")), "\"bell\\u0007\"");
    }

    #[test]
    fn test_deterministic_hashing() {
        let a = json!({"pattern": "x", "severity": "high"});
        let b = json!({"severity": "high", "pattern": "x"});
        assert_eq!(
            sha256_hex(canonical_json(&a).as_bytes()),
            sha256_hex(canonical_json(&b).as_bytes())
        );
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
