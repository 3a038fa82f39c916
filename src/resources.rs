//! Typed wrappers for the collection endpoints the dashboard reads most.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dispatcher::ApiClient;
use crate::error::ApiError;
use crate::refetch::CachedCollection;
use crate::versions::{self, VersionMap, VERSIONS_ENDPOINT};

/// A row of any collection. The backend names ids and display names per
/// table (`users_id`, `clients_name`, ...); the common aliases are lifted
/// into `id` / `name` and everything else stays in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(
        default,
        alias = "users_id",
        alias = "clients_id",
        alias = "products_id",
        alias = "safes_id"
    )]
    pub id: Option<Value>,
    #[serde(
        default,
        alias = "users_name",
        alias = "clients_name",
        alias = "products_name",
        alias = "safes_name"
    )]
    pub name: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// `id` as text, whether the backend sent a number or a string.
    pub fn id_string(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

async fn get_all(client: &ApiClient, collection: CachedCollection) -> Result<Vec<Record>, ApiError> {
    let rows: Option<Vec<Record>> = client.get_data(&collection.endpoint()).await?;
    Ok(rows.unwrap_or_default())
}

pub async fn get_all_users(client: &ApiClient) -> Result<Vec<Record>, ApiError> {
    get_all(client, CachedCollection::Users).await
}

pub async fn get_all_clients(client: &ApiClient) -> Result<Vec<Record>, ApiError> {
    get_all(client, CachedCollection::Clients).await
}

pub async fn get_all_products(client: &ApiClient) -> Result<Vec<Record>, ApiError> {
    get_all(client, CachedCollection::Products).await
}

pub async fn get_all_safes(client: &ApiClient) -> Result<Vec<Record>, ApiError> {
    get_all(client, CachedCollection::Safes).await
}

/// Current server-side entity versions, bypassing reconciliation.
pub async fn get_entity_versions(client: &ApiClient) -> Result<VersionMap, ApiError> {
    let data: Value = client.get_data(VERSIONS_ENDPOINT).await?;
    versions::normalize_versions(&data)
}
