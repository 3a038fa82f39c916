//! Authorization-failure detection.
//!
//! The backend reports expired or invalid sessions in prose, sometimes inside
//! a 200 response. Detection matches a fixed phrase set (English and Arabic)
//! case-insensitively, an exact sentinel, and the machine-readable `code` /
//! `error_code` envelope fields newer endpoints send.

use serde_json::Value;

/// Sent verbatim by endpoints that reject a request before any business logic.
pub const AUTH_SENTINEL: &str = "AUTH_REQUIRED";

const AUTH_FAILURE_PHRASES: &[&str] = &[
    "not authorized",
    "unauthorized",
    "invalid session",
    "session expired",
    "please login again",
    "authentication error",
    "غير مصرح",
    "انتهت الجلسة",
    "يرجى تسجيل الدخول",
];

const AUTH_FAILURE_CODES: &[&str] = &["unauthorized", "session_expired", "auth_required"];

/// Endpoint prefixes that belong to the authentication service. They are not
/// company-scoped and never carry the session identity.
const AUTH_ENDPOINT_PREFIXES: &[&str] = &["auth/", "login/"];

pub fn is_auth_endpoint(endpoint: &str) -> bool {
    let endpoint = endpoint.trim_start_matches('/').to_ascii_lowercase();
    AUTH_ENDPOINT_PREFIXES
        .iter()
        .any(|prefix| endpoint.starts_with(prefix))
}

/// Does `message` describe an authorization failure?
///
/// With `phrase_matching` off only the sentinel is recognised.
pub fn is_authorization_failure(message: &str, phrase_matching: bool) -> bool {
    let trimmed = message.trim();
    if trimmed == AUTH_SENTINEL {
        return true;
    }
    if !phrase_matching {
        return false;
    }
    let lower = trimmed.to_lowercase();
    AUTH_FAILURE_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
}

/// Machine-readable authorization code in a decoded response body.
pub fn has_authorization_code(body: &Value) -> bool {
    ["code", "error_code"].iter().any(|field| {
        body.get(*field)
            .and_then(Value::as_str)
            .map(|code| {
                let code = code.trim().to_ascii_lowercase();
                AUTH_FAILURE_CODES.contains(&code.as_str())
            })
            .unwrap_or(false)
    })
}
