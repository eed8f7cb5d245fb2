//! Minimal JSON-Cadence decoding for event payloads.
//!
//! Only what the queue consumers need: exactly one level of `Optional` is
//! unwrapped per value, integer types become JSON numbers and fields whose
//! name ends in `time` become floating numbers. Everything else, a nested
//! `Optional` included, keeps its textual value.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Number, Value};

use super::RpcError;

/// Decodes a base64 JSON-Cadence event payload into its field map.
pub fn decode_payload(payload: &str) -> Result<Map<String, Value>, RpcError> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|err| RpcError::Decode(format!("payload is not base64: {err}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|err| RpcError::Decode(format!("payload is not JSON-Cadence: {err}")))?;

    let fields = value
        .get("value")
        .and_then(|inner| inner.get("fields"))
        .and_then(Value::as_array)
        .ok_or_else(|| RpcError::Decode("event payload has no fields".into()))?;

    Ok(decode_fields(fields))
}

fn decode_fields(fields: &[Value]) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|field| {
            let name = field.get("name")?.as_str()?;
            let value = field.get("value")?;
            Some((name.to_string(), decode_field(name, value)))
        })
        .collect()
}

fn decode_field(name: &str, value: &Value) -> Value {
    let decoded = decode_value(value);
    if name.to_ascii_lowercase().ends_with("time") {
        to_float(decoded)
    } else {
        decoded
    }
}

fn decode_value(value: &Value) -> Value {
    let inner = value.get("value").unwrap_or(&Value::Null);
    match type_of(value) {
        Some(kind) if is_integer_type(kind) => to_integer(inner),
        Some("Optional") => match type_of(inner) {
            _ if inner.is_null() => Value::Null,
            Some("Optional") => inner.clone(),
            _ => decode_value(inner),
        },
        Some("Void") => Value::Null,
        Some("Array") => Value::Array(
            inner
                .as_array()
                .map(|items| items.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        Some("Dictionary") => {
            let mut map = Map::new();
            for pair in inner.as_array().into_iter().flatten() {
                let key = match pair.get("key").map(decode_value) {
                    Some(Value::String(text)) => text,
                    Some(other) => other.to_string(),
                    None => continue,
                };
                let entry = pair.get("value").map(decode_value).unwrap_or(Value::Null);
                map.insert(key, entry);
            }
            Value::Object(map)
        }
        Some("Struct" | "Resource" | "Event" | "Contract" | "Enum") => {
            let fields = inner
                .get("fields")
                .and_then(Value::as_array)
                .map(|fields| decode_fields(fields))
                .unwrap_or_default();
            Value::Object(fields)
        }
        Some("Type") => inner
            .get("staticType")
            .and_then(|ty| ty.get("typeID"))
            .cloned()
            .unwrap_or_else(|| inner.clone()),
        Some(_) => inner.clone(),
        None => value.clone(),
    }
}

fn type_of(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

fn is_integer_type(kind: &str) -> bool {
    ["Int", "UInt", "Word"]
        .iter()
        .any(|prefix| kind.strip_prefix(prefix).is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit())))
}

/// Integers beyond the 64-bit range stay as strings.
fn to_integer(value: &Value) -> Value {
    match value {
        Value::String(text) => {
            if let Ok(unsigned) = text.parse::<u64>() {
                Value::Number(unsigned.into())
            } else if let Ok(signed) = text.parse::<i64>() {
                Value::Number(signed.into())
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

fn to_float(value: Value) -> Value {
    let parsed = match &value {
        Value::String(text) => text.parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    };
    parsed
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(value)
}
