//! Session identity and the relogin flow.
//!
//! The session is `Active` while an identity or company scope is persisted.
//! The first authorization failure wipes all persisted state, notifies the
//! registered [`SessionEventSink`] (or asks the embedder to redirect to the
//! login route) and moves to `Cleared`. Further failures while cleared have
//! no side effects. A successful login re-activates the session.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::events::{ClientEvent, EventBus};
use crate::store::{self, PersistentStore, KEY_COMPANY_NAME, KEY_SESSION};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub users_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Cleared,
}

/// Hook the embedding application registers to present a "log in again"
/// prompt when the session expires.
pub trait SessionEventSink: Send + Sync {
    fn on_session_expired(&self);
}

pub struct SessionManager {
    store: Arc<dyn PersistentStore>,
    sink: Option<Arc<dyn SessionEventSink>>,
    events: EventBus,
    login_route: String,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        sink: Option<Arc<dyn SessionEventSink>>,
        events: EventBus,
        login_route: impl Into<String>,
    ) -> Self {
        let has_state = store::read_json::<SessionIdentity>(store.as_ref(), KEY_SESSION).is_some()
            || company_from(store.as_ref()).is_some();
        let state = if has_state {
            SessionState::Active
        } else {
            SessionState::Cleared
        };
        Self {
            store,
            sink,
            events,
            login_route: login_route.into(),
            state: Mutex::new(state),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        store::read_json::<SessionIdentity>(self.store.as_ref(), KEY_SESSION)
            .filter(|identity| !identity.users_uuid.trim().is_empty())
    }

    pub fn company(&self) -> Option<String> {
        company_from(self.store.as_ref())
    }

    pub fn set_company(&self, company: &str) -> Result<(), StoreError> {
        self.store.set(KEY_COMPANY_NAME, company.trim())?;
        *self.lock_state() = SessionState::Active;
        Ok(())
    }

    /// Persist a fresh login and re-activate the session.
    pub fn activate(&self, identity: &SessionIdentity, company: &str) -> Result<(), StoreError> {
        store::write_json(self.store.as_ref(), KEY_SESSION, identity)?;
        self.store.set(KEY_COMPANY_NAME, company.trim())?;
        *self.lock_state() = SessionState::Active;
        info!(company = %company.trim(), "session activated");
        Ok(())
    }

    /// User-initiated logout: wipe state without a relogin prompt.
    pub fn logout(&self) -> Result<(), StoreError> {
        self.store.clear()?;
        *self.lock_state() = SessionState::Cleared;
        info!("session cleared by logout");
        Ok(())
    }

    /// Authorization failure detected. Returns `true` if this call performed
    /// the transition (state wiped, sink or redirect triggered).
    pub fn expire(&self, source: &str, reason: &str) -> bool {
        {
            let mut state = self.lock_state();
            if *state == SessionState::Cleared {
                return false;
            }
            *state = SessionState::Cleared;
        }

        warn!(
            source = %source,
            reason = %reason,
            "Authorization failure detected; clearing local state and starting relogin"
        );
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear local state after authorization failure");
        }

        self.events.emit(ClientEvent::SessionExpired {
            source: source.to_string(),
            reason: reason.to_string(),
        });
        match &self.sink {
            Some(sink) => sink.on_session_expired(),
            None => self.events.emit(ClientEvent::RedirectToLogin {
                route: self.login_route.clone(),
            }),
        }
        true
    }
}

fn company_from(store: &dyn PersistentStore) -> Option<String> {
    match store.get(KEY_COMPANY_NAME) {
        Ok(value) => value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        Err(e) => {
            warn!(error = %e, "failed to read company name");
            None
        }
    }
}
