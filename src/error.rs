//! Error types shared by the request layer and the local state store.

use thiserror::Error;

/// Errors surfaced by [`crate::ApiClient`] and the components built on it.
///
/// `Clone` is required because coalesced callers all receive the outcome of
/// one underlying request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// Missing base URL, unresolved company scope or a malformed endpoint.
    /// Raised before any network I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request never produced an HTTP response.
    #[error("{0}")]
    Transport(String),

    /// Non-2xx response. `message` is already translated for display.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// Authorization failure; local state has been wiped and the relogin
    /// flow started.
    #[error("{0}")]
    SessionExpired(String),

    /// `status: "error"` envelope on a 2xx response.
    #[error("{0}")]
    Business(String),

    /// The response could not be decoded into the requested type.
    #[error("Invalid response from server: {0}")]
    Decode(String),

    #[error("Local storage error: {0}")]
    Store(String),
}

impl ApiError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired(_))
    }

    /// HTTP status of the failed response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failures of the persistent key/value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("create data dir: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err.to_string())
    }
}
