//! In-flight request coalescing.
//!
//! Concurrent identical operations share one network round-trip: the first
//! caller spawns the request, later callers with the same key get a clone of
//! the same shared future. The entry is dropped as soon as the request
//! finishes, so the next call after completion goes to the network again.

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::body::IDENTITY_FIELD;
use crate::error::ApiError;

/// Query parameter carrying the cache-busting timestamp.
pub const CACHE_BUSTER_PARAM: &str = "_t";

pub type SharedCall = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Write,
}

struct Entry {
    generation: u64,
    call: SharedCall,
}

#[derive(Default)]
struct Maps {
    reads: HashMap<String, Entry>,
    writes: HashMap<String, Entry>,
    next_generation: u64,
}

impl Maps {
    fn map_mut(&mut self, kind: CallKind) -> &mut HashMap<String, Entry> {
        match kind {
            CallKind::Read => &mut self.reads,
            CallKind::Write => &mut self.writes,
        }
    }
}

/// Per-client coalescing state. Cloning shares the maps.
#[derive(Clone, Default)]
pub struct RequestCoalescer {
    inner: Arc<Mutex<Maps>>,
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live (read, write) entries.
    pub fn in_flight(&self) -> (usize, usize) {
        let maps = self.lock();
        (maps.reads.len(), maps.writes.len())
    }

    /// Join the in-flight call for `key`, or start one with `start`.
    ///
    /// The request runs on its own task, so it completes even if every
    /// caller stops waiting for it.
    pub fn run<F, Fut>(&self, kind: CallKind, key: String, start: F) -> SharedCall
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let mut maps = self.lock();
        if let Some(entry) = maps.map_mut(kind).get(&key) {
            debug!(key = %key, "joining in-flight request");
            return entry.call.clone();
        }

        maps.next_generation += 1;
        let generation = maps.next_generation;

        let request = start();
        let inner = self.inner.clone();
        let cleanup_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = request.await;
            let mut maps = inner.lock().unwrap_or_else(PoisonError::into_inner);
            let map = maps.map_mut(kind);
            if map.get(&cleanup_key).map(|e| e.generation) == Some(generation) {
                map.remove(&cleanup_key);
            }
            result
        });

        let call = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(ApiError::Transport(format!("request task failed: {e}"))))
        }
        .boxed()
        .shared();

        maps.map_mut(kind).insert(
            key,
            Entry {
                generation,
                call: call.clone(),
            },
        );
        call
    }
}

/// Strip transport-only query parameters (cache buster, session identity)
/// so they never split otherwise identical requests.
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query().is_none() {
        return parsed.to_string();
    }
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| !matches!(&**name, CACHE_BUSTER_PARAM | IDENTITY_FIELD))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

/// Key of a GET request.
pub fn read_key(url: &str) -> String {
    normalize_url(url)
}

/// Key of a mutating request: `METHOD::normalizedURL::bodySignature`.
pub fn write_key(method: &str, url: &str, body_signature: &str) -> String {
    format!(
        "{}::{}::{}",
        method.to_ascii_uppercase(),
        normalize_url(url),
        body_signature
    )
}
