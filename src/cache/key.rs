//! Deterministic cache keys from ordered parts.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// One component of a cache key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
  /// Used verbatim, except that `:` and `\` are backslash-escaped and text
  /// that reads as JSON is written as a JSON string
  Str(String),
  /// Encoded as canonical JSON
  Value(Value),
}

impl From<&str> for KeyPart {
  fn from(s: &str) -> Self {
    KeyPart::Str(s.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(s: String) -> Self {
    KeyPart::Str(s)
  }
}

impl From<Value> for KeyPart {
  fn from(v: Value) -> Self {
    match v {
      Value::String(s) => KeyPart::Str(s),
      other => KeyPart::Value(other),
    }
  }
}

/// Join `parts` into one key, e.g. `["gallery", {"page": 2}]` becomes
/// `gallery:{"page":2}`.
///
/// Distinct part lists give distinct keys: string parts escape `:` and never
/// encode the same as a structured part.
pub fn build_key(parts: &[KeyPart]) -> String {
  let mut key = String::new();
  for (i, part) in parts.iter().enumerate() {
    if i > 0 {
      key.push(':');
    }
    match part {
      KeyPart::Str(s) => write_str(s, &mut key),
      KeyPart::Value(v) => write_canonical(v, &mut key),
    }
  }
  key
}

/// SHA-256 of [`build_key`], for fixed-length keys.
pub fn hashed_key(parts: &[KeyPart]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(build_key(parts).as_bytes());
  hex::encode(hasher.finalize())
}

fn write_str(s: &str, out: &mut String) {
  let looks_like_json =
    s.starts_with(['{', '[', '"']) || serde_json::from_str::<Value>(s).is_ok();
  let text = if looks_like_json {
    Value::String(s.to_string()).to_string()
  } else {
    s.to_string()
  };

  for c in text.chars() {
    if c == ':' || c == '\\' {
      out.push('\\');
    }
    out.push(c);
  }
}

/// JSON with object members sorted by key, no whitespace.
fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut members: Vec<_> = map.iter().collect();
      members.sort_by(|(a, _), (b, _)| a.cmp(b));
      out.push('{');
      for (i, (k, v)) in members.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(v, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, v) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(v, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_same_parts_same_key() {
    let a = build_key(&["a".into(), json!({"b": 1}).into()]);
    let b = build_key(&["a".into(), json!({"b": 1}).into()]);
    assert_eq!(a, b);
    assert_eq!(a, r#"a:{"b":1}"#);
  }

  #[test]
  fn test_different_structures_differ() {
    let a = build_key(&["a".into(), json!({"b": 1}).into()]);
    let b = build_key(&["a".into(), json!({"b": 2}).into()]);
    assert_ne!(a, b);

    let nested_a = build_key(&[json!({"f": {"x": [1, 2]}}).into()]);
    let nested_b = build_key(&[json!({"f": {"x": [2, 1]}}).into()]);
    assert_ne!(nested_a, nested_b);
  }

  #[test]
  fn test_member_order_does_not_matter() {
    let mut first = serde_json::Map::new();
    first.insert("z".into(), json!(1));
    first.insert("a".into(), json!({"y": true, "b": null}));
    let mut second = serde_json::Map::new();
    second.insert("a".into(), json!({"b": null, "y": true}));
    second.insert("z".into(), json!(1));

    assert_eq!(
      build_key(&["items".into(), Value::Object(first).into()]),
      build_key(&["items".into(), Value::Object(second).into()])
    );
  }

  #[test]
  fn test_string_value_matches_str_part() {
    assert_eq!(
      build_key(&[json!("trades").into()]),
      build_key(&["trades".into()])
    );
  }

  #[test]
  fn test_separator_in_string_part_is_escaped() {
    assert_ne!(build_key(&["a:b".into()]), build_key(&["a".into(), "b".into()]));
    assert_eq!(build_key(&["a:b".into()]), r"a\:b");
    assert_ne!(build_key(&[r"a\".into(), "b".into()]), build_key(&[r"a\:b".into()]));
  }

  #[test]
  fn test_json_text_differs_from_structured_part() {
    assert_ne!(
      build_key(&["a".into(), r#"{"b":1}"#.into()]),
      build_key(&["a".into(), json!({"b": 1}).into()])
    );
    assert_ne!(build_key(&["7".into()]), build_key(&[json!(7).into()]));
    assert_ne!(build_key(&["null".into()]), build_key(&[json!(null).into()]));
    // a string that splits a structured part in two
    assert_ne!(
      build_key(&["a".into(), r#"{"b""#.into(), "1}".into()]),
      build_key(&["a".into(), json!({"b": 1}).into()])
    );
  }

  #[test]
  fn test_plain_strings_stay_readable() {
    assert_eq!(
      build_key(&["trades".into(), "GET".into(), json!({"page": 2}).into()]),
      r#"trades:GET:{"page":2}"#
    );
  }

  #[test]
  fn test_hashed_key_is_fixed_length() {
    let key = hashed_key(&["inventory".into(), json!({"owner": 7}).into()]);
    assert_eq!(key.len(), 64);
    assert_eq!(
      key,
      hashed_key(&["inventory".into(), json!({"owner": 7}).into()])
    );
  }
}
