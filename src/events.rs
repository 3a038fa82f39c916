//! Client events broadcast to whoever embeds the client (UI shell, daemon).

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Authorization failure detected; local state has been wiped.
    SessionExpired { source: String, reason: String },
    /// No session sink was registered, so the embedder should navigate to
    /// the login route itself.
    RedirectToLogin { route: String },
    /// A reconciliation pass found stale entities.
    VersionsChanged { changed: Vec<String> },
    /// Cached collections refetched after a version change.
    CacheRefreshed {
        refreshed: Vec<String>,
        failed: Vec<String>,
    },
}

/// Thin wrapper over a broadcast channel. Emitting with no subscribers is
/// not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Log events until every sender is gone, returning how many were seen.
/// Falling behind drops the oldest events but does not stop the loop.
pub async fn log_events(mut rx: broadcast::Receiver<ClientEvent>) -> usize {
    let mut seen = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                seen += 1;
                match &event {
                    ClientEvent::RedirectToLogin { route } => {
                        warn!(route = %route, "session expired; log in from the dashboard to resume");
                    }
                    other => debug!(event = ?other, "client event"),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event logger fell behind");
            }
            Err(RecvError::Closed) => return seen,
        }
    }
}
