//! Dev-mode request logging.
//!
//! Every dispatched request can be logged with its method, resolved URL,
//! status, duration and size plus sanitized, size-capped body summaries and
//! a readable label derived from the endpoint path.

use reqwest::Url;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::body::IDENTITY_FIELD;

/// Longest body summary written to the log, in characters.
const MAX_SUMMARY_CHARS: usize = 600;

/// Items kept from arrays in body summaries.
const MAX_SUMMARY_ITEMS: usize = 5;

/// Stands in for sensitive query values; survives URL encoding unchanged.
const MASKED_QUERY_VALUE: &str = "***";

pub struct RequestRecord<'a> {
    pub method: &'a str,
    pub url: &'a str,
    pub status: Option<u16>,
    pub duration: Duration,
    pub response_bytes: usize,
    pub request_body: &'a Value,
    pub response_body: &'a Value,
}

pub fn log_request(record: &RequestRecord<'_>) {
    debug!(
        target: "erp_admin_client::requests",
        label = %describe_request(record.method, record.url),
        method = record.method,
        url = %mask_url(record.url),
        status = record.status,
        duration_ms = record.duration.as_millis() as u64,
        response_bytes = record.response_bytes,
        request = %summarize(record.request_body),
        response = %summarize(record.response_body),
        "api request"
    );
}

/// Human label from the last two path segments, e.g.
/// `.../clients/get_all.php` → "Fetching clients".
pub fn describe_request(method: &str, url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let mut segments = path.rsplit('/').filter(|s| !s.is_empty());
    let file = segments.next().unwrap_or_default();
    let resource = segments.next().unwrap_or("resource").replace(['_', '-'], " ");

    let action = file
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file)
        .to_ascii_lowercase();

    let verb = if action.starts_with("get_all") || action.starts_with("list") {
        "Fetching"
    } else if action.starts_with("add") || action.starts_with("create") {
        "Creating"
    } else if action.starts_with("update") || action.starts_with("edit") {
        "Updating"
    } else if action.starts_with("delete") || action.starts_with("remove") {
        "Deleting"
    } else if action.starts_with("get") {
        "Loading"
    } else {
        match method.to_ascii_uppercase().as_str() {
            "GET" => "Loading",
            "DELETE" => "Deleting",
            _ => "Calling",
        }
    };

    format!("{verb} {resource}")
}

/// Replace the session identity query value so log files carry no usable
/// session.
pub fn mask_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query().is_none() {
        return parsed.to_string();
    }
    let masked: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(name, value)| {
            let value = if should_redact_key(&name) {
                MASKED_QUERY_VALUE.to_string()
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(masked);
    parsed.to_string()
}

/// Redacted, truncated single-line rendering of a body.
pub fn summarize(value: &Value) -> String {
    let rendered = trim_arrays(redact_sensitive_fields(value.clone())).to_string();
    if rendered.chars().count() <= MAX_SUMMARY_CHARS {
        return rendered;
    }
    let truncated: String = rendered.chars().take(MAX_SUMMARY_CHARS).collect();
    format!("{truncated}… ({} chars)", rendered.chars().count())
}

fn trim_arrays(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let total = items.len();
            let mut kept: Vec<Value> = items
                .into_iter()
                .take(MAX_SUMMARY_ITEMS)
                .map(trim_arrays)
                .collect();
            if total > MAX_SUMMARY_ITEMS {
                kept.push(Value::String(format!(
                    "… {} more",
                    total - MAX_SUMMARY_ITEMS
                )));
            }
            Value::Array(kept)
        }
        Value::Object(map) => {
            Value::Object(map.into_iter().map(|(k, v)| (k, trim_arrays(v))).collect())
        }
        other => other,
    }
}

pub(crate) fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    if normalized == IDENTITY_FIELD {
        return true;
    }
    let sensitive_markers = [
        "password",
        "passwd",
        "token",
        "secret",
        "api_key",
        "apikey",
        "authorization",
        "cookie",
    ];
    sensitive_markers
        .iter()
        .any(|marker| normalized.contains(marker))
}
