//! Entity version reconciliation.
//!
//! The backend publishes a version number per entity collection. A refresh
//! fetches that map (throttled), diffs it against the last persisted copy
//! and reports which entities changed so their cached collections can be
//! refetched. The remote map always replaces the local one. Failures fall
//! back to the persisted map with nothing marked as changed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dispatcher::ApiClient;
use crate::envelope::{ApiEnvelope, FailureKind};
use crate::error::ApiError;
use crate::events::ClientEvent;
use crate::store::{
    self, PersistentStore, KEY_ENTITY_VERSIONS, KEY_LEGACY_VERSIONS, KEY_VERSIONS_FETCHED_AT,
};

pub const VERSIONS_ENDPOINT: &str = "versions/get_all.php";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EntityVersion {
    #[serde(default)]
    pub version: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

pub type VersionMap = BTreeMap<String, EntityVersion>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub versions: VersionMap,
    pub changed: Vec<String>,
    /// Whether the server was actually contacted and its map persisted.
    pub fetched: bool,
}

impl ReconcileOutcome {
    fn unchanged(versions: VersionMap) -> Self {
        Self {
            versions,
            changed: Vec::new(),
            fetched: false,
        }
    }
}

pub struct VersionReconciler {
    client: ApiClient,
    store: Arc<dyn PersistentStore>,
}

impl VersionReconciler {
    pub fn new(client: ApiClient) -> Self {
        let store = client.store();
        Self { client, store }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Move a version map stored under the legacy key to the canonical key.
    /// The legacy key is removed either way; an existing canonical map wins.
    pub fn migrate_legacy_key(&self) -> Result<bool, ApiError> {
        let Some(raw) = self.store.get(KEY_LEGACY_VERSIONS)? else {
            return Ok(false);
        };

        let mut migrated = false;
        if self.store.get(KEY_ENTITY_VERSIONS)?.is_none() {
            match serde_json::from_str::<Value>(&raw)
                .map_err(|e| ApiError::Decode(e.to_string()))
                .and_then(|value| normalize_versions(&value))
            {
                Ok(map) => {
                    store::write_json(self.store.as_ref(), KEY_ENTITY_VERSIONS, &map)?;
                    migrated = true;
                }
                Err(e) => warn!(error = %e, "dropping unreadable legacy version map"),
            }
        }
        self.store.remove(KEY_LEGACY_VERSIONS)?;
        info!(migrated, "legacy version key removed");
        Ok(migrated)
    }

    pub fn local_versions(&self) -> VersionMap {
        store::read_json::<VersionMap>(self.store.as_ref(), KEY_ENTITY_VERSIONS).unwrap_or_default()
    }

    /// Unix ms of the last successful fetch.
    pub fn last_fetched_at(&self) -> Option<i64> {
        self.store
            .get(KEY_VERSIONS_FETCHED_AT)
            .ok()
            .flatten()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
    }

    /// Run one reconciliation pass.
    pub async fn refresh(&self, force: bool, min_interval: Duration) -> ReconcileOutcome {
        let local = self.local_versions();

        if !force {
            if let Some(last) = self.last_fetched_at() {
                let elapsed_ms = chrono::Utc::now().timestamp_millis().saturating_sub(last);
                if elapsed_ms >= 0 && (elapsed_ms as u128) < min_interval.as_millis() {
                    debug!(elapsed_ms, "version check throttled");
                    return ReconcileOutcome::unchanged(local);
                }
            }
        }

        if self.client.session().company().is_none() {
            debug!("no company scope; skipping version check");
            return ReconcileOutcome::unchanged(local);
        }

        let remote = match self.fetch_remote().await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "version check failed; keeping cached data");
                return ReconcileOutcome::unchanged(local);
            }
        };

        let changed = diff_versions(&local, &remote);

        if let Err(e) = store::write_json(self.store.as_ref(), KEY_ENTITY_VERSIONS, &remote) {
            warn!(error = %e, "failed to persist version map");
        }
        if let Err(e) = self.store.set(
            KEY_VERSIONS_FETCHED_AT,
            &chrono::Utc::now().timestamp_millis().to_string(),
        ) {
            warn!(error = %e, "failed to persist version fetch time");
        }

        if !changed.is_empty() {
            info!(changed = ?changed, "entity versions changed");
            self.client.events().emit(ClientEvent::VersionsChanged {
                changed: changed.clone(),
            });
        }

        ReconcileOutcome {
            versions: remote,
            changed,
            fetched: true,
        }
    }

    async fn fetch_remote(&self) -> Result<VersionMap, ApiError> {
        let body = self.client.get(VERSIONS_ENDPOINT).await?;
        let data = match ApiEnvelope::from_value(body, self.client.config().phrase_auth_detection) {
            ApiEnvelope::Success { data, .. } => data,
            ApiEnvelope::Failure {
                kind: FailureKind::Unauthorized,
                ..
            } => {
                return Err(ApiError::SessionExpired(
                    "version check rejected".to_string(),
                ))
            }
            ApiEnvelope::Failure {
                kind: FailureKind::Malformed,
                message,
            } => return Err(ApiError::Decode(message)),
            ApiEnvelope::Failure { message, .. } => return Err(ApiError::Business(message)),
        };
        normalize_versions(&data)
    }
}

/// Accept either `{entity: {version, updated_at}}` or
/// `[{entity, version, updated_at}]`. Every entry must carry a numeric
/// version; anything else means the payload is not a version map.
pub fn normalize_versions(data: &Value) -> Result<VersionMap, ApiError> {
    let mut map = VersionMap::new();
    match data {
        Value::Object(entries) => {
            for (entity, entry) in entries {
                map.insert(entity.clone(), parse_entry(entity, entry)?);
            }
        }
        Value::Array(records) => {
            for record in records {
                let Some(entity) = record
                    .get("entity")
                    .or_else(|| record.get("entity_name"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                else {
                    warn!(record = %record, "version record without entity name skipped");
                    continue;
                };
                map.insert(entity.to_string(), parse_entry(entity, record)?);
            }
        }
        Value::Null => {}
        other => {
            return Err(ApiError::Decode(format!(
                "unexpected version map shape: {other}"
            )))
        }
    }
    Ok(map)
}

fn parse_entry(entity: &str, entry: &Value) -> Result<EntityVersion, ApiError> {
    // Bare numbers are accepted as `{version: n}`.
    let (version, updated_at) = if entry.is_number() || entry.is_string() {
        (parse_version(entry), None)
    } else {
        (
            entry.get("version").and_then(parse_version),
            entry
                .get("updated_at")
                .and_then(Value::as_str)
                .map(str::to_string),
        )
    };
    match version {
        Some(_) => Ok(EntityVersion {
            version,
            updated_at,
        }),
        None => Err(ApiError::Decode(format!(
            "no numeric version for entity {entity}: {entry}"
        ))),
    }
}

fn parse_version(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Entities whose remote version is defined and differs from (or is absent
/// in) the local map, in name order.
pub fn diff_versions(local: &VersionMap, remote: &VersionMap) -> Vec<String> {
    let keys: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    keys.into_iter()
        .filter(|entity| {
            let remote_version = remote.get(*entity).and_then(|v| v.version);
            let local_version = local.get(*entity).and_then(|v| v.version);
            match (remote_version, local_version) {
                (Some(r), Some(l)) => r != l,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
        .cloned()
        .collect()
}
