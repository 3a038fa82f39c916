//! ERP dashboard API client.
//!
//! [`ApiClient`] is the single HTTP entry point. It resolves company-scoped
//! URLs, injects the session identity, coalesces duplicate in-flight calls,
//! decodes the response envelope and classifies failures, starting the
//! relogin flow when the backend reports an authorization failure.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::auth;
use crate::body::{RequestBody, IDENTITY_FIELD};
use crate::coalesce::{self, CallKind, RequestCoalescer, CACHE_BUSTER_PARAM};
use crate::config::{ClientConfig, Language};
use crate::envelope::{self, ApiEnvelope, FailureKind};
use crate::error::ApiError;
use crate::events::{ClientEvent, EventBus};
use crate::request_log::{self, RequestRecord};
use crate::session::{SessionEventSink, SessionIdentity, SessionManager};
use crate::store::PersistentStore;
use crate::translate;
use crate::value_str;

pub const LOGIN_ENDPOINT: &str = "auth/login.php";

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HashMap<String, String>,
    /// Force authentication-endpoint handling (no company scope, no
    /// identity, no relogin on failure). Endpoints under `auth/` get it
    /// automatically.
    pub auth_endpoint: bool,
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

pub struct LoginCredentials {
    pub username: String,
    pub password: Zeroizing<String>,
    /// Company to scope to when the login response does not name one.
    pub company: Option<String>,
}

struct ClientInner {
    config: ClientConfig,
    http: Client,
    session: SessionManager,
    coalescer: RequestCoalescer,
    events: EventBus,
}

/// Cheap to clone; clones share coalescing state and session.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    store: Option<Arc<dyn PersistentStore>>,
    sink: Option<Arc<dyn SessionEventSink>>,
    events: Option<EventBus>,
}

impl ApiClientBuilder {
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session_sink(mut self, sink: Arc<dyn SessionEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let http = Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to create HTTP client: {e}")))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(crate::store::MemoryStore::new()));
        let events = self.events.unwrap_or_default();
        let session = SessionManager::new(
            store,
            self.sink,
            events.clone(),
            self.config.login_route.clone(),
        );

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                http,
                session,
                coalescer: RequestCoalescer::new(),
                events,
            }),
        })
    }
}

/// Everything needed to execute one request, owned so it can move into the
/// request task.
struct PreparedRequest {
    method: Method,
    url: String,
    body: RequestBody,
    identity: Option<String>,
    headers: HashMap<String, String>,
    auth_endpoint: bool,
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store: None,
            sink: None,
            events: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn language(&self) -> Language {
        self.inner.config.language
    }

    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    pub fn store(&self) -> Arc<dyn PersistentStore> {
        self.inner.session.store().clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn coalescer(&self) -> &RequestCoalescer {
        &self.inner.coalescer
    }

    // -----------------------------------------------------------------------
    // Raw requests
    // -----------------------------------------------------------------------

    pub async fn get(&self, endpoint: &str) -> Result<Value, ApiError> {
        self.request(Method::GET, endpoint, RequestBody::Empty, RequestOptions::default())
            .await
    }

    pub async fn post(&self, endpoint: &str, body: impl Into<RequestBody>) -> Result<Value, ApiError> {
        self.request(Method::POST, endpoint, body.into(), RequestOptions::default())
            .await
    }

    pub async fn put(&self, endpoint: &str, body: impl Into<RequestBody>) -> Result<Value, ApiError> {
        self.request(Method::PUT, endpoint, body.into(), RequestOptions::default())
            .await
    }

    pub async fn delete(
        &self,
        endpoint: &str,
        body: impl Into<RequestBody>,
    ) -> Result<Value, ApiError> {
        self.request(Method::DELETE, endpoint, body.into(), RequestOptions::default())
            .await
    }

    /// Dispatch a request and return the decoded response body.
    ///
    /// Non-2xx responses and authorization failures are errors; a 2xx
    /// `status: "error"` envelope is returned as-is (see [`ApiClient::fetch`]
    /// for typed unwrapping).
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<Value, ApiError> {
        let prepared = self.prepare(method, endpoint, body, options)?;

        let (kind, key) = if prepared.method == Method::GET {
            (CallKind::Read, coalesce::read_key(&prepared.url))
        } else {
            (
                CallKind::Write,
                coalesce::write_key(
                    prepared.method.as_str(),
                    &prepared.url,
                    &prepared.body.signature(),
                ),
            )
        };

        let inner = self.inner.clone();
        self.inner
            .coalescer
            .run(kind, key, move || execute(inner, prepared))
            .await
    }

    /// Dispatch a request and unwrap the envelope's `data` into `T`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let auth_endpoint = options.auth_endpoint || auth::is_auth_endpoint(endpoint);
        let body = self.request(method, endpoint, body, options).await?;
        let mut envelope = ApiEnvelope::from_value(body, self.inner.config.phrase_auth_detection);
        // A rejected login is an ordinary failure, not an expired session.
        if auth_endpoint {
            if let ApiEnvelope::Failure {
                kind: kind @ FailureKind::Unauthorized,
                ..
            } = &mut envelope
            {
                *kind = FailureKind::Business;
            }
        }
        envelope.decode::<T>()?.into_result(self.language())
    }

    pub async fn get_data<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.fetch(Method::GET, endpoint, RequestBody::Empty, RequestOptions::default())
            .await
    }

    pub async fn post_data<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: impl Into<RequestBody>,
    ) -> Result<T, ApiError> {
        self.fetch(Method::POST, endpoint, body.into(), RequestOptions::default())
            .await
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Authenticate and persist the returned session identity and company.
    pub async fn login(&self, credentials: LoginCredentials) -> Result<SessionIdentity, ApiError> {
        let mut payload = serde_json::json!({
            "username": credentials.username.trim(),
            "password": credentials.password.as_str(),
        });
        if let Some(company) = credentials.company.as_deref() {
            payload["company_name"] = Value::String(company.trim().to_string());
        }

        let data: Value = self
            .fetch(
                Method::POST,
                LOGIN_ENDPOINT,
                RequestBody::Json(payload),
                RequestOptions {
                    auth_endpoint: true,
                    ..RequestOptions::default()
                },
            )
            .await?;

        let users_uuid = value_str(&data, &["users_uuid", "uuid", "session_uuid"])
            .ok_or_else(|| ApiError::Decode("login response is missing users_uuid".into()))?;
        let company = value_str(&data, &["company_name", "company"])
            .or_else(|| credentials.company.clone())
            .ok_or_else(|| ApiError::Decode("login response is missing company name".into()))?;

        let identity = SessionIdentity {
            users_uuid,
            user_id: value_str(&data, &["user_id", "users_id", "id"]).or_else(|| {
                ["user_id", "users_id", "id"]
                    .iter()
                    .find_map(|key| data.get(*key).and_then(Value::as_i64))
                    .map(|id| id.to_string())
            }),
            name: value_str(&data, &["name", "users_name", "username"]),
        };
        self.inner.session.activate(&identity, &company)?;
        info!(company = %company, "login succeeded");
        Ok(identity)
    }

    pub fn logout(&self) -> Result<(), ApiError> {
        self.inner.session.logout()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Request preparation
    // -----------------------------------------------------------------------

    fn prepare(
        &self,
        method: Method,
        endpoint: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> Result<PreparedRequest, ApiError> {
        validate_endpoint(endpoint)?;
        let auth_endpoint = options.auth_endpoint || auth::is_auth_endpoint(endpoint);
        let base = self.inner.config.resolved_base_url()?;
        let endpoint = endpoint.trim().trim_start_matches('/');

        let (url, identity) = if auth_endpoint {
            (format!("{base}/{endpoint}"), None)
        } else {
            let company = self.inner.session.company().ok_or_else(|| {
                ApiError::Config("Company name is not set; log in first".to_string())
            })?;
            let identity = self
                .inner
                .session
                .identity()
                .map(|identity| identity.users_uuid);
            (format!("{base}/{company}/{endpoint}"), identity)
        };

        Ok(PreparedRequest {
            method,
            url,
            body,
            identity,
            headers: options.headers,
            auth_endpoint,
        })
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ApiError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(ApiError::Config("Missing API endpoint".into()));
    }
    if endpoint.contains("..") {
        return Err(ApiError::Config(format!("Invalid API endpoint: {endpoint}")));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Err(ApiError::Config(
            "Absolute URLs are not allowed; pass an endpoint relative to the API base".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a readable message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach the API server at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid API URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

fn status_error(status: StatusCode) -> String {
    format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown Status")
    )
}

fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn execute(inner: Arc<ClientInner>, prepared: PreparedRequest) -> Result<Value, ApiError> {
    let PreparedRequest {
        method,
        url,
        body,
        identity,
        headers,
        auth_endpoint,
    } = prepared;
    let config = &inner.config;

    let mut wire_url = reqwest::Url::parse(&url)
        .map_err(|e| ApiError::Config(format!("Invalid API URL {url}: {e}")))?;
    let has_identity_param = wire_url.query_pairs().any(|(k, _)| k == IDENTITY_FIELD);
    {
        let mut query = wire_url.query_pairs_mut();
        if method == Method::GET && !has_identity_param {
            if let Some(uuid) = identity.as_deref() {
                query.append_pair(IDENTITY_FIELD, uuid);
            }
        }
        query.append_pair(CACHE_BUSTER_PARAM, &unix_millis().to_string());
    }

    let body = match identity.as_deref() {
        Some(uuid) if method != Method::GET => body.with_identity(uuid),
        _ => body,
    };
    let request_summary = body.summary();

    let mut req = inner.http.request(method.clone(), wire_url.clone());
    if let Some(uuid) = identity.as_deref() {
        req = req.header("X-Users-Uuid", uuid);
    }
    for (name, value) in &headers {
        req = req.header(name.as_str(), value.as_str());
    }
    req = match body {
        RequestBody::Empty => req,
        RequestBody::Json(value) => req.json(&value),
        RequestBody::Text(text) => req.header("Content-Type", "text/plain; charset=utf-8").body(text),
        RequestBody::Form(form) => {
            let multipart = form
                .into_multipart()
                .map_err(|e| ApiError::Config(format!("Invalid form field: {e}")))?;
            req.multipart(multipart)
        }
    };

    let started = Instant::now();
    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            let message = friendly_error(wire_url.as_str(), &e);
            if config.dev_logging {
                request_log::log_request(&RequestRecord {
                    method: method.as_str(),
                    url: wire_url.as_str(),
                    status: None,
                    duration: started.elapsed(),
                    response_bytes: 0,
                    request_body: &request_summary,
                    response_body: &Value::Null,
                });
            }
            if !auth_endpoint && auth::is_authorization_failure(&message, config.phrase_auth_detection) {
                return Err(expire_session(&inner, &url, &message));
            }
            warn!(url = %request_log::mask_url(wire_url.as_str()), error = %message, "request failed");
            return Err(ApiError::Transport(translate::translate_error(
                &message,
                config.language,
            )));
        }
    };

    let status = resp.status();
    let text = match resp.text().await {
        Ok(text) => text,
        Err(e) => {
            let message = friendly_error(wire_url.as_str(), &e);
            warn!(
                url = %request_log::mask_url(wire_url.as_str()),
                status = status.as_u16(),
                error = %message,
                "response body could not be read"
            );
            return Err(ApiError::Transport(translate::translate_error(
                &message,
                config.language,
            )));
        }
    };
    let body = envelope::decode_body(&text);

    if config.dev_logging {
        request_log::log_request(&RequestRecord {
            method: method.as_str(),
            url: wire_url.as_str(),
            status: Some(status.as_u16()),
            duration: started.elapsed(),
            response_bytes: text.len(),
            request_body: &request_summary,
            response_body: &body,
        });
    }

    let message = envelope::message_text(&body);
    if !auth_endpoint {
        let unauthorized = auth::has_authorization_code(&body)
            || message
                .as_deref()
                .map(|m| auth::is_authorization_failure(m, config.phrase_auth_detection))
                .unwrap_or(false);
        if unauthorized {
            let reason = message.unwrap_or_else(|| status_error(status));
            return Err(expire_session(&inner, &url, &reason));
        }
    }

    if !status.is_success() {
        let message = message.unwrap_or_else(|| status_error(status));
        return Err(ApiError::Http {
            status: status.as_u16(),
            message: translate::translate_error(&message, config.language),
        });
    }

    Ok(body)
}

fn expire_session(inner: &ClientInner, url: &str, reason: &str) -> ApiError {
    inner.session.expire(&request_log::mask_url(url), reason);
    ApiError::SessionExpired(translate::session_expired_message(inner.config.language).to_string())
}

impl ApiClient {
    /// Subscribe to session and cache events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }
}
