//! Canonical serialization of JSON values for hashing.
//!
//! Two logically equal values must produce identical bytes regardless of key
//! insertion order, so object keys are emitted in code-point order and the
//! output carries no whitespace. This is the exact byte stream fed to SHA-256
//! (after the kind-name prefix), so any change here changes every identity.

use serde_json::Value;

/// Render `value` in canonical form: compact, keys sorted, total.
pub fn canonical(value: &Value) -> String {
  let mut out = String::new();
  write_value(&mut out, value);
  out
}

fn write_value(out: &mut String, value: &Value) {
  match value {
    Value::Null => out.push_str("null"),
    Value::Bool(true) => out.push_str("true"),
    Value::Bool(false) => out.push_str("false"),
    Value::Number(n) => {
      // serde_json numbers are finite by construction; the guard keeps the
      // non-finite -> null rule if an arbitrary-precision build sneaks one in
      if n.as_f64().is_some_and(|f| !f.is_finite()) {
        out.push_str("null");
      } else {
        out.push_str(&n.to_string());
      }
    }
    Value::String(s) => write_string(out, s),
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_value(out, item);
      }
      out.push(']');
    }
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort_unstable();
      out.push('{');
      for (i, key) in keys.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, &map[*key]);
      }
      out.push('}');
    }
  }
}

/// Standard JSON string escaping.
fn write_string(out: &mut String, s: &str) {
  out.push('"');
  for c in s.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      '\u{08}' => out.push_str("\\b"),
      '\u{0c}' => out.push_str("\\f"),
      c if (c as u32) < 0x20 => {
        out.push_str(&format!("\\u{:04x}", c as u32));
      }
      c => out.push(c),
    }
  }
  out.push('"');
}
