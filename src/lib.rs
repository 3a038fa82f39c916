//! ERP dashboard API client.
//!
//! Every dashboard screen talks to the PHP backend through one
//! [`ApiClient`]: it scopes URLs to the active company, injects the session
//! identity, shares duplicate in-flight calls, and turns in-band
//! authorization failures into a single relogin. [`VersionReconciler`]
//! keeps the local entity-version map in step with the server and drives
//! the [`CacheRefresher`] for whatever changed.

pub mod auth;
pub mod body;
pub mod coalesce;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod events;
pub mod monitor;
pub mod refetch;
pub mod request_log;
pub mod resources;
pub mod session;
pub mod store;
pub mod translate;
pub mod versions;

pub use body::{FormBody, RequestBody};
pub use config::{ClientConfig, Language};
pub use dispatcher::{ApiClient, ApiClientBuilder, LoginCredentials, RequestOptions};
pub use envelope::ApiEnvelope;
pub use error::{ApiError, StoreError};
pub use events::{ClientEvent, EventBus};
pub use monitor::start_version_monitor;
pub use refetch::{CacheRefresher, CachedCollection, RefetchPlan, RefreshReport};
pub use session::{SessionEventSink, SessionIdentity, SessionManager, SessionState};
pub use store::{MemoryStore, PersistentStore, SqliteStore};
pub use versions::{ReconcileOutcome, VersionMap, VersionReconciler};

/// First non-empty string among `keys` in a JSON object.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
