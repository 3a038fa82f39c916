//! Client configuration.
//!
//! Values come from `ERP_*` environment variables (see [`ClientConfig::from_env`])
//! or are set directly by the embedding application. A missing base URL is
//! accepted here and reported as [`ApiError::Config`] at call time.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::ApiError;

/// Default timeout for API requests (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum time between two non-forced version fetches.
pub const DEFAULT_VERSION_MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Cadence of the background version monitor.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

const ENV_BASE_URL: &str = "ERP_API_BASE_URL";
const ENV_DEV_LOGGING: &str = "ERP_DEV_LOGGING";
const ENV_LANGUAGE: &str = "ERP_LANGUAGE";
const ENV_VERSION_MIN_INTERVAL: &str = "ERP_VERSION_MIN_INTERVAL_SECS";
const ENV_MONITOR_INTERVAL: &str = "ERP_MONITOR_INTERVAL_SECS";
const ENV_REQUEST_TIMEOUT: &str = "ERP_REQUEST_TIMEOUT_SECS";
const ENV_PHRASE_AUTH_DETECTION: &str = "ERP_PHRASE_AUTH_DETECTION";
const ENV_DATA_DIR: &str = "ERP_DATA_DIR";

/// Display language for user-facing error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Arabic,
    English,
}

impl Language {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "ar" | "arabic" => Some(Language::Arabic),
            "en" | "english" => Some(Language::English),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub language: Language,
    /// Emit a structured debug record for every request.
    pub dev_logging: bool,
    /// Treat backend prose such as "session expired" as an authorization
    /// failure. When off only machine-readable codes and the sentinel count.
    pub phrase_auth_detection: bool,
    pub request_timeout: Duration,
    pub version_min_interval: Duration,
    pub monitor_interval: Duration,
    pub login_route: String,
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            language: Language::default(),
            dev_logging: cfg!(debug_assertions),
            phrase_auth_detection: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            version_min_interval: DEFAULT_VERSION_MIN_INTERVAL,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            data_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Build a config from the process environment, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_string(ENV_BASE_URL) {
            config.base_url = Some(url);
        }
        if let Some(flag) = env_string(ENV_DEV_LOGGING) {
            match parse_flag(&flag) {
                Some(v) => config.dev_logging = v,
                None => warn!(var = ENV_DEV_LOGGING, value = %flag, "ignoring invalid flag"),
            }
        }
        if let Some(flag) = env_string(ENV_PHRASE_AUTH_DETECTION) {
            match parse_flag(&flag) {
                Some(v) => config.phrase_auth_detection = v,
                None => {
                    warn!(var = ENV_PHRASE_AUTH_DETECTION, value = %flag, "ignoring invalid flag")
                }
            }
        }
        if let Some(code) = env_string(ENV_LANGUAGE) {
            match Language::from_code(&code) {
                Some(lang) => config.language = lang,
                None => warn!(var = ENV_LANGUAGE, value = %code, "unknown language code"),
            }
        }
        if let Some(secs) = env_secs(ENV_VERSION_MIN_INTERVAL) {
            config.version_min_interval = secs;
        }
        if let Some(secs) = env_secs(ENV_MONITOR_INTERVAL) {
            config.monitor_interval = secs;
        }
        if let Some(secs) = env_secs(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = secs;
        }
        if let Some(dir) = env_string(ENV_DATA_DIR) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        config
    }

    /// Normalised base URL, or a configuration error when none is set.
    pub fn resolved_base_url(&self) -> Result<String, ApiError> {
        let raw = self.base_url.as_deref().unwrap_or_default();
        let normalized = normalize_base_url(raw);
        if normalized.is_empty() {
            return Err(ApiError::Config(format!(
                "API base URL is not configured (set {ENV_BASE_URL})"
            )));
        }
        Ok(normalized)
    }
}

/// Normalise the API base URL:
/// - trim whitespace
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    let raw = env_string(key)?;
    match raw.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            warn!(var = key, value = %raw, "expected a number of seconds");
            None
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
