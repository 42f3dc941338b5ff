//! Lenient JSON handling for model replies.

use serde_json::{Map, Value};

/// Remove a Markdown code fence (and its `json` tag) around a reply.
pub fn strip_code_fence(reply: &str) -> &str {
    let content = reply.trim();
    if !content.starts_with("```") {
        return content;
    }
    let inner = content.split("```").nth(1).unwrap_or("");
    inner.strip_prefix("json").unwrap_or(inner).trim()
}

/// Parse a reply that should hold a single JSON object.
pub fn parse_object(reply: &str) -> serde_json::Result<Map<String, Value>> {
    serde_json::from_str(strip_code_fence(reply))
}

/// First non-null string among `keys`.
pub fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Integer field; models sometimes quote numbers or emit `7.0`.
pub fn int_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

pub fn float_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn bool_field(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
