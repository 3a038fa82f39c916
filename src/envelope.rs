//! The `{status, message, data}` response envelope.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth;
use crate::config::Language;
use crate::error::ApiError;
use crate::translate;

/// Field a non-JSON response body is wrapped under.
pub const RAW_BODY_FIELD: &str = "raw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Business,
    Unauthorized,
    /// Not an envelope at all: no `status` field, an empty body or a
    /// non-JSON page such as a PHP error dump.
    Malformed,
}

/// A decoded backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiEnvelope<T> {
    Success {
        data: T,
        message: Option<String>,
    },
    Failure {
        message: String,
        kind: FailureKind,
    },
}

impl ApiEnvelope<Value> {
    /// Classify a raw response body.
    ///
    /// Only `status: "success"` yields data. A body without a `status` field
    /// is [`FailureKind::Malformed`], so a 200 error page never reaches a
    /// cache.
    pub fn from_value(body: Value, phrase_auth_detection: bool) -> Self {
        let message = message_text(&body);
        let unauthorized = auth::has_authorization_code(&body)
            || message
                .as_deref()
                .map(|m| auth::is_authorization_failure(m, phrase_auth_detection))
                .unwrap_or(false);

        if unauthorized {
            return ApiEnvelope::Failure {
                message: message.unwrap_or_else(|| auth::AUTH_SENTINEL.to_string()),
                kind: FailureKind::Unauthorized,
            };
        }

        let status = body
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase());

        match status.as_deref() {
            Some("success") => {
                let data = match body {
                    Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                ApiEnvelope::Success { data, message }
            }
            Some(_) => ApiEnvelope::Failure {
                message: message.unwrap_or_else(|| "Request failed".to_string()),
                kind: FailureKind::Business,
            },
            None => ApiEnvelope::Failure {
                message: malformed_message(&body),
                kind: FailureKind::Malformed,
            },
        }
    }

    /// Decode `data` into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<ApiEnvelope<T>, ApiError> {
        match self {
            ApiEnvelope::Success { data, message } => {
                let data = serde_json::from_value::<T>(data)
                    .map_err(|e| ApiError::Decode(e.to_string()))?;
                Ok(ApiEnvelope::Success { data, message })
            }
            ApiEnvelope::Failure { message, kind } => Ok(ApiEnvelope::Failure { message, kind }),
        }
    }
}

impl<T> ApiEnvelope<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ApiEnvelope::Success { .. })
    }

    /// Unwrap `data`, turning a failure envelope into a translated error.
    pub fn into_result(self, language: Language) -> Result<T, ApiError> {
        match self {
            ApiEnvelope::Success { data, .. } => Ok(data),
            ApiEnvelope::Failure {
                kind: FailureKind::Unauthorized,
                ..
            } => Err(ApiError::SessionExpired(
                translate::session_expired_message(language).to_string(),
            )),
            ApiEnvelope::Failure {
                kind: FailureKind::Malformed,
                message,
            } => Err(ApiError::Decode(message)),
            ApiEnvelope::Failure { message, .. } => Err(ApiError::Business(
                translate::translate_error(&message, language),
            )),
        }
    }
}

fn malformed_message(body: &Value) -> String {
    match body {
        Value::Null => "empty response body".to_string(),
        Value::Object(map) if map.contains_key(RAW_BODY_FIELD) => {
            "response is not JSON".to_string()
        }
        _ => "response has no status field".to_string(),
    }
}

/// Decode a response body: JSON when possible, otherwise `{"raw": text}`.
/// An empty body decodes to `null`.
pub fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str::<Value>(text)
        .unwrap_or_else(|_| serde_json::json!({ RAW_BODY_FIELD: text }))
}

/// Human-readable message of a response body. `message` may be a string or
/// an object of per-field / per-language strings; `error` is the fallback
/// field some endpoints use.
pub fn message_text(body: &Value) -> Option<String> {
    ["message", "error"]
        .iter()
        .filter_map(|field| body.get(*field))
        .find_map(flatten_message)
}

fn flatten_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(map) => {
            let parts: Vec<String> = map.values().filter_map(flatten_message).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" / "))
            }
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(flatten_message).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" / "))
            }
        }
        _ => None,
    }
}
