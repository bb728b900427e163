//! Request normalization and response-format enforcement.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("payload must be a JSON object or array")]
    NotAnObjectOrArray,
}

/// A request payload after parsing and re-serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPayload {
    /// Compact re-serialized body sent to nodes.
    pub body: String,
    pub value: Value,
    /// JSON-RPC method label used in logs and metrics.
    pub method: String,
}

impl NormalizedPayload {
    /// Parses and re-serializes a raw payload. An empty payload normalizes to `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the payload is not a JSON object or array.
    pub fn parse(raw: &str) -> Result<Self, PayloadError> {
        let value: Value = if raw.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| PayloadError::Malformed(e.to_string()))?
        };

        if !value.is_object() && !value.is_array() {
            return Err(PayloadError::NotAnObjectOrArray);
        }

        let body = value.to_string();
        let method = method_label(&value);
        Ok(Self { body, value, method })
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.value.is_array()
    }
}

/// Batch ⇒ comma-joined methods (missing ones as empty strings); single request
/// ⇒ its method; otherwise empty.
#[must_use]
pub fn method_label(value: &Value) -> String {
    fn method_of(v: &Value) -> &str {
        v.get("method").and_then(Value::as_str).unwrap_or_default()
    }

    match value {
        Value::Array(items) => items.iter().map(method_of).collect::<Vec<_>>().join(","),
        Value::Object(_) => method_of(value).to_string(),
        _ => String::new(),
    }
}

/// Lightweight structural check that `text` could be JSON.
///
/// Skips string literals (with valid escapes), numbers and the `true`,
/// `false` and `null` literals, then requires that only brackets, braces,
/// commas, colons and whitespace remain. Does not check nesting.
#[must_use]
pub fn is_json_shaped(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'[' | b']' | b'{' | b'}' | b',' | b':' | b' ' | b'\t' | b'\n' | b'\r' => i += 1,
            b'"' => match skip_string(bytes, i + 1) {
                Some(next) => i = next,
                None => return false,
            },
            b'-' | b'0'..=b'9' => match skip_number(bytes, i) {
                Some(next) => i = next,
                None => return false,
            },
            b't' if bytes[i..].starts_with(b"true") => i += 4,
            b'f' if bytes[i..].starts_with(b"false") => i += 5,
            b'n' if bytes[i..].starts_with(b"null") => i += 4,
            _ => return false,
        }
    }
    true
}

/// Returns the index after the closing quote of a string starting at `start`.
fn skip_string(bytes: &[u8], mut i: usize) -> Option<usize> {
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Some(i + 1),
            b'\n' | b'\r' => return None,
            b'\\' => match bytes.get(i + 1)? {
                b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't' => i += 2,
                b'u' => {
                    let hex = bytes.get(i + 2..i + 6)?;
                    if !hex.iter().all(u8::is_ascii_hexdigit) {
                        return None;
                    }
                    i += 6;
                }
                _ => return None,
            },
            _ => i += 1,
        }
    }
    None
}

/// Matches `-?\d+(\.\d*)?([eE][+-]?\d+)?` starting at `i`.
fn skip_number(bytes: &[u8], mut i: usize) -> Option<usize> {
    let digits = |bytes: &[u8], mut j: usize| {
        let start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        (j, j - start)
    };

    if bytes[i] == b'-' {
        i += 1;
    }
    let (next, count) = digits(bytes, i);
    if count == 0 {
        return None;
    }
    i = next;

    if bytes.get(i) == Some(&b'.') {
        i = digits(bytes, i + 1).0;
    }

    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let (next, count) = digits(bytes, j);
        if count > 0 {
            i = next;
        }
    }
    Some(i)
}

/// A JSON-RPC error response: an object with a non-null `error` member, or a
/// non-empty batch made only of such objects.
#[must_use]
pub fn is_error_shaped(value: &Value) -> bool {
    fn has_error(v: &Value) -> bool {
        v.get("error").is_some_and(|e| !e.is_null())
    }

    match value {
        Value::Object(_) => has_error(value),
        Value::Array(items) => !items.is_empty() && items.iter().all(has_error),
        _ => false,
    }
}

/// Response body as returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayBody {
    /// Passed through untouched.
    Raw(String),
    /// Parsed, because the blockchain enforces JSON responses.
    Json(Value),
}

impl RelayBody {
    #[must_use]
    pub fn into_string(self) -> String {
        match self {
            Self::Raw(s) => s,
            Self::Json(v) => v.to_string(),
        }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

/// Applies response-format enforcement to a node's payload.
///
/// # Errors
///
/// Returns the reason the payload was rejected.
pub fn enforce_response(payload: &str, enforce_json: bool) -> Result<RelayBody, String> {
    if !enforce_json {
        return Ok(RelayBody::Raw(payload.to_string()));
    }
    if !is_json_shaped(payload) {
        return Err("response is not JSON".to_string());
    }
    let value: Value =
        serde_json::from_str(payload).map_err(|e| format!("response is not valid JSON: {e}"))?;
    if is_error_shaped(&value) {
        return Err(format!("node returned an error response: {}", truncate(payload, 200)));
    }
    Ok(RelayBody::Json(value))
}

fn truncate(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
