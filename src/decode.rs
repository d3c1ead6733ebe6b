use serde_json::Value;

/// Best-effort structured parse of a secret payload: strict JSON first, then
/// YAML (which also accepts indentation-based data), falling back to the raw
/// string when neither parses.
pub fn decode_value(raw: &str) -> Value {
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        return parsed;
    }
    if let Ok(parsed) = serde_yaml::from_str::<Value>(raw) {
        return parsed;
    }
    Value::String(raw.to_string())
}

/// Decoding is applied per-read and only when enabled; the cache always holds
/// the raw string.
pub fn render_value(raw: &str, parse: bool) -> Value {
    if parse {
        decode_value(raw)
    } else {
        Value::String(raw.to_string())
    }
}
