//! Canonical JSON serialization.
//!
//! Object keys are written in ascending codepoint order with no
//! whitespace, and numbers are formatted the way `JSON.stringify` formats
//! them, so a fingerprint computed here matches one computed by the
//! JavaScript tooling over the same sorted object.

use serde_json::{Number, Value};

use crate::error::CoreError;

/// Largest integer a JavaScript number represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// Serialize `value` canonically.
pub fn to_canonical_string(value: &Value) -> Result<String, CoreError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Serialize `value` canonically as UTF-8 bytes, ready for hashing.
pub fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>, CoreError> {
    to_canonical_string(value).map(String::into_bytes)
}

/// Build a JSON number from a float, rejecting NaN and infinities.
pub fn number_from_f64(field: &str, value: f64) -> Result<Value, CoreError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| CoreError::Serialization(format!("{field} is not a finite number: {value}")))
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CoreError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            // Byte order of UTF-8 strings equals codepoint order.
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out)?;
                out.push(':');
                write_value(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_number(n: &Number, out: &mut String) -> Result<(), CoreError> {
    if let Some(i) = n.as_i64() {
        if i.unsigned_abs() <= MAX_SAFE_INTEGER {
            out.push_str(&i.to_string());
            return Ok(());
        }
    } else if let Some(u) = n.as_u64() {
        if u <= MAX_SAFE_INTEGER {
            out.push_str(&u.to_string());
            return Ok(());
        }
    }
    // Everything else is printed as the nearest double, the way a JS
    // number holding it would be.
    let f = n
        .as_f64()
        .ok_or_else(|| CoreError::Serialization(format!("unrepresentable number {n}")))?;
    if !f.is_finite() {
        return Err(CoreError::Serialization(format!("non-finite number {f}")));
    }
    if f == 0.0 {
        // -0 prints as 0.
        out.push('0');
    } else {
        out.push_str(ryu_js::Buffer::new().format_finite(f));
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) -> Result<(), CoreError> {
    let quoted =
        serde_json::to_string(s).map_err(|e| CoreError::Serialization(e.to_string()))?;
    out.push_str(&quoted);
    Ok(())
}
