use serde_json::Value;

use crate::error::ApiError;

const MAX_MESSAGE_CHARS: usize = 500;

/// Turn a response into JSON, mapping HTTP failures and error envelopes to
/// [`ApiError`].
pub(crate) async fn read_json(operation: &str, resp: reqwest::Response) -> Result<Value, ApiError> {
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| ApiError::transport(operation, e))?;
    let body: Option<Value> = serde_json::from_str(&text).ok();

    if !status.is_success() {
        let message = body
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| truncate(text.trim()));
        return Err(ApiError::Http {
            operation: operation.into(),
            status: status.as_u16(),
            message,
        });
    }

    let body = body.ok_or_else(|| ApiError::parse(operation, "response body is not JSON"))?;
    if let Some(message) = error_message(&body) {
        return Err(ApiError::Remote {
            operation: operation.into(),
            message,
        });
    }
    Ok(body)
}

/// Extract the remote's own error text from a response envelope.
///
/// Handles the webhook shape `{"error", "error_description"}` and the REST
/// shape `{"errorMessages": [...], "errors": {field: msg}}`.
pub(crate) fn error_message(body: &Value) -> Option<String> {
    let obj = body.as_object()?;

    if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
        let message = obj
            .get("error_description")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(String::from)
            .unwrap_or_else(|| match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        return Some(truncate(&message));
    }

    let mut messages: Vec<String> = obj
        .get("errorMessages")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();
    if let Some(errors) = obj.get("errors").and_then(Value::as_object) {
        for (field, msg) in errors {
            if let Some(msg) = msg.as_str() {
                messages.push(format!("{field}: {msg}"));
            }
        }
    }
    if messages.is_empty() {
        None
    } else {
        Some(truncate(&messages.join("; ")))
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_MESSAGE_CHARS).collect()
}

/// Accept an id given either as a JSON number or a numeric string.
pub(crate) fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
