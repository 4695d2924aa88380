//! Conversions between command-line text and call arguments / results.

use serde_json::Value;

/// Parse a user-supplied parameter string into call arguments.
///
/// - a JSON array becomes its elements
/// - a JSON object becomes a one-element list
/// - text containing `,` is split and trimmed
/// - anything else is a single bare string, so numbers wider than 64 bits
///   reach the encoder as exact decimal text
#[must_use]
pub fn parse_parameters(input: &str) -> Vec<Value> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => return items,
        Ok(object @ Value::Object(_)) => return vec![object],
        _ => {}
    }
    if trimmed.contains(',') {
        return trimmed
            .split(',')
            .map(|part| Value::String(part.trim().to_string()))
            .collect();
    }
    vec![Value::String(trimmed.to_string())]
}

/// Render a call result for display
#[must_use]
pub fn format_return_value(value: &Value, as_json: bool) -> String {
    if as_json {
        return serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    }
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| format!("[{i}] {}", format_return_value(v, false)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
    }
}
