//! Shared utilities for the integration tests: a programmable mock ERP
//! backend on a random local port and client builders pointed at it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use erp_admin_client::{
    ApiClient, ClientConfig, Language, MemoryStore, PersistentStore, SessionEventSink,
    SessionIdentity,
};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const COMPANY: &str = "acme";
pub const USERS_UUID: &str = "3f1c2b9e-uuid";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

type Handler = dyn Fn(&RecordedRequest) -> (u16, String) + Send + Sync;

struct BackendState {
    hits: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Duration,
    /// Announce more bytes than are sent, then hang up mid-body.
    truncate_body: bool,
    handler: Box<Handler>,
}

pub struct MockBackend {
    pub base_url: String,
    state: Arc<BackendState>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn hits_for(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> RecordedRequest {
        self.requests().last().cloned().expect("no request recorded")
    }
}

/// Start a backend that answers every request through `handler` after
/// `delay`. Requests are recorded (and counted) before the delay.
pub async fn start_backend<F>(delay: Duration, handler: F) -> MockBackend
where
    F: Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
{
    spawn_backend(delay, false, handler).await
}

/// Backend whose responses stop short of their `Content-Length`.
pub async fn start_truncating_backend(body: Value) -> MockBackend {
    let body = body.to_string();
    spawn_backend(Duration::ZERO, true, move |_| (200, body.clone())).await
}

async fn spawn_backend<F>(delay: Duration, truncate_body: bool, handler: F) -> MockBackend
where
    F: Fn(&RecordedRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(BackendState {
        hits: AtomicUsize::new(0),
        requests: Mutex::new(Vec::new()),
        delay,
        truncate_body,
        handler: Box::new(handler),
    });

    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let state = accept_state.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, state).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend {
        base_url: format!("http://{addr}"),
        state,
    }
}

/// Backend that always answers `200` with `body`.
pub async fn start_json_backend(delay: Duration, body: Value) -> MockBackend {
    let body = body.to_string();
    start_backend(delay, move |_| (200, body.clone())).await
}

async fn serve(mut socket: TcpStream, state: Arc<BackendState>) -> std::io::Result<()> {
    let request = read_request(&mut socket).await?;
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(request.clone());

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    let (status, body) = (state.handler)(&request);
    let status_text = match status {
        200 => "200 OK",
        401 => "401 Unauthorized",
        403 => "403 Forbidden",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        _ => "200 OK",
    };
    let declared_len = if state.truncate_body {
        body.len() + 64
    } else {
        body.len()
    };
    let response = format!(
        "HTTP/1.1 {status_text}\r\nContent-Type: application/json\r\nContent-Length: {declared_len}\r\nConnection: close\r\n\r\n{body}"
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let mut body = buf[header_end + 4..].to_vec();
    if let Some(len) = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        while body.len() < len {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body.truncate(len);
    } else if headers
        .get("transfer-encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
    {
        while find(&body, b"0\r\n\r\n").is_none() {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body = dechunk(&body);
    }

    let url = reqwest::Url::parse(&format!("http://mock{target}")).unwrap();
    Ok(RecordedRequest {
        method,
        path: url.path().to_string(),
        query: url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn dechunk(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = raw;
    while let Some(line_end) = find(rest, b"\r\n") {
        let size_text = String::from_utf8_lossy(&rest[..line_end]).to_string();
        let size = usize::from_str_radix(size_text.trim(), 16).unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        let end = (start + size).min(rest.len());
        out.extend_from_slice(&rest[start..end]);
        rest = &rest[(end + 2).min(rest.len())..];
    }
    out
}

#[derive(Default)]
pub struct CountingSink(pub AtomicUsize);

impl CountingSink {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl SessionEventSink for CountingSink {
    fn on_session_expired(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn config_for(backend: &MockBackend) -> ClientConfig {
    let mut config = ClientConfig::default()
        .with_base_url(backend.base_url.clone())
        .with_language(Language::English);
    config.dev_logging = true;
    config
}

pub struct TestClient {
    pub client: ApiClient,
    pub store: Arc<MemoryStore>,
    pub sink: Arc<CountingSink>,
}

/// Client with a logged-in session for [`COMPANY`] / [`USERS_UUID`].
pub fn logged_in_client(backend: &MockBackend) -> TestClient {
    client_with_config(config_for(backend), true)
}

pub fn logged_out_client(backend: &MockBackend) -> TestClient {
    client_with_config(config_for(backend), false)
}

pub fn client_with_config(config: ClientConfig, logged_in: bool) -> TestClient {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(CountingSink::default());
    let client = ApiClient::builder(config)
        .store(store.clone() as Arc<dyn PersistentStore>)
        .session_sink(sink.clone() as Arc<dyn SessionEventSink>)
        .build()
        .unwrap();
    if logged_in {
        client
            .session()
            .activate(
                &SessionIdentity {
                    users_uuid: USERS_UUID.to_string(),
                    user_id: Some("7".to_string()),
                    name: Some("Mona".to_string()),
                },
                COMPANY,
            )
            .unwrap();
    }
    TestClient {
        client,
        store,
        sink,
    }
}
