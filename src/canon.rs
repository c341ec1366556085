// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::number::canonical_f64_string;
use crate::value::Value;

use chrono::SecondsFormat;

// Canonical JSON: keys sorted at every level, no insignificant
// whitespace, integers as-is, finite non-integers positional with at
// most 15 significant digits, NaN and infinities as null, dates as
// ISO 8601 UTC. The output is the byte-exact signing input.

fn escape_str(s: &str, out: &mut String) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        _ => out.push_str("\"\""),
    }
}

pub fn canonical_json(v: &Value) -> String {
    let mut out = String::new();
    write_value(v, &mut out);
    out
}

fn write_value(v: &Value, out: &mut String) {
    match v {
        Value::Null | Value::Undefined | Value::Func(_) => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_i128() {
            Some(i) => out.push_str(&i.to_string()),
            _ => match n.as_f64().and_then(canonical_f64_string) {
                Some(s) => out.push_str(&s),
                _ => out.push_str("null"),
            },
        },
        Value::String(s) => escape_str(s, out),
        Value::Timestamp(t) => {
            escape_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true), out);
        }
        Value::Quantity(q) => escape_str(&q.to_triple_text(), out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        // BTreeMap iterates keys in sorted order.
        Value::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                escape_str(k, out);
                out.push(':');
                write_value(v, out);
            }
            out.push('}');
        }
    }
}

/// Canonical form of an arbitrary JSON value; used for the document
/// part of the signable payload, which is carried exactly as supplied
/// but serialized with sorted keys.
pub fn canonical_json_of(v: &serde_json::Value) -> String {
    let mut out = String::new();
    write_json(v, &mut out);
    out
}

fn write_json(v: &serde_json::Value, out: &mut String) {
    match v {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                match n.as_f64().and_then(canonical_f64_string) {
                    Some(s) => out.push_str(&s),
                    _ => out.push_str("null"),
                }
            }
        }
        serde_json::Value::String(s) => escape_str(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                escape_str(k, out);
                out.push(':');
                write_json(&map[k.as_str()], out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_keys_and_no_whitespace() {
        let v: serde_json::Value = match serde_json::from_str(r#"{"b": 1, "a": {"d": 2, "c": 3}}"#)
        {
            Ok(v) => v,
            _ => return,
        };
        assert_eq!(canonical_json_of(&v), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn key_order_of_input_is_irrelevant() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap_or_default();
        let b: serde_json::Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap_or_default();
        assert_eq!(canonical_json_of(&a), canonical_json_of(&b));
    }

    #[test]
    fn numbers_are_positional() {
        let v: serde_json::Value =
            serde_json::from_str(r#"[115000, 0.15, 1e2]"#).unwrap_or_default();
        assert_eq!(canonical_json_of(&v), "[115000,0.15,100]");
    }

    #[test]
    fn round_trip_is_stable() {
        let v: serde_json::Value =
            serde_json::from_str(r#"{"b":[1,2.5,"x"],"a":null,"c":{"k":true}}"#)
                .unwrap_or_default();
        let canonical = canonical_json_of(&v);
        let reparsed: serde_json::Value =
            serde_json::from_str(&canonical).unwrap_or_default();
        assert_eq!(canonical_json_of(&reparsed), canonical);
    }
}
