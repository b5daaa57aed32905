use serde_json::Value;

const MASK: &str = "***";

/// Keys whose values never reach the logs.
const SENSITIVE_KEYS: &[&str] = &[
    "access_id",
    "access_secret",
    "access_token",
    "client_secret",
    "ip",
    "lat",
    "link_id",
    "local_key",
    "lon",
    "password",
    "refresh_token",
    "uid",
];

/// Copy of `value` with sensitive fields masked, at any depth.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if SENSITIVE_KEYS.contains(&k.as_str()) {
                        Value::String(MASK.to_string())
                    } else {
                        redact(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Response text for logging: JSON bodies are redacted, anything else is kept.
pub fn redact_text(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => redact(&value).to_string(),
        Err(_) => text.to_string(),
    }
}

/// Mask the path segment that follows each occurrence of `prefix`, for
/// endpoints that carry a credential in the URL (e.g. `/v1.0/token/{refresh}`).
pub fn redact_path(text: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(prefix) {
        let (head, tail) = rest.split_at(idx + prefix.len());
        out.push_str(head);
        let end = tail
            .find(|c: char| matches!(c, '/' | '?' | '&' | '#' | '"' | ')') || c.is_whitespace())
            .unwrap_or(tail.len());
        if end > 0 {
            out.push_str(MASK);
        }
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}
