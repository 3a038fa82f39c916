//! Cached collections and the refetch step that follows a version change.
//!
//! Changed entity names map to the collection that has to be refetched.
//! Derived entities (variants, units, prices of a product) map to their
//! parent, and each collection is refetched at most once per pass.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::dispatcher::ApiClient;
use crate::error::ApiError;
use crate::events::ClientEvent;
use crate::store::{self, CACHE_KEY_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CachedCollection {
    Clients,
    Products,
    Categories,
    Warehouses,
    Inventory,
    Safes,
    Users,
    Suppliers,
    VisitPlans,
    PaymentMethods,
    Settings,
}

impl CachedCollection {
    pub const ALL: [CachedCollection; 11] = [
        CachedCollection::Clients,
        CachedCollection::Products,
        CachedCollection::Categories,
        CachedCollection::Warehouses,
        CachedCollection::Inventory,
        CachedCollection::Safes,
        CachedCollection::Users,
        CachedCollection::Suppliers,
        CachedCollection::VisitPlans,
        CachedCollection::PaymentMethods,
        CachedCollection::Settings,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CachedCollection::Clients => "clients",
            CachedCollection::Products => "products",
            CachedCollection::Categories => "categories",
            CachedCollection::Warehouses => "warehouses",
            CachedCollection::Inventory => "inventory",
            CachedCollection::Safes => "safes",
            CachedCollection::Users => "users",
            CachedCollection::Suppliers => "suppliers",
            CachedCollection::VisitPlans => "visit_plans",
            CachedCollection::PaymentMethods => "payment_methods",
            CachedCollection::Settings => "settings",
        }
    }

    pub fn endpoint(self) -> String {
        format!("{}/get_all.php", self.name())
    }

    pub fn cache_key(self) -> String {
        format!("{CACHE_KEY_PREFIX}{}", self.name())
    }

    /// Collection that has to be refetched when `entity` changes.
    pub fn for_entity(entity: &str) -> Option<CachedCollection> {
        let entity = entity.trim().to_ascii_lowercase();
        if let Some(direct) = Self::ALL.into_iter().find(|c| c.name() == entity) {
            return Some(direct);
        }
        let derived = match entity.as_str() {
            "product_variants" | "product_units" | "product_prices" | "product_images" => {
                CachedCollection::Products
            }
            "client_areas" | "client_types" => CachedCollection::Clients,
            "product_categories" => CachedCollection::Categories,
            "safe_transactions" => CachedCollection::Safes,
            "warehouse_stock" | "stock" => CachedCollection::Inventory,
            "visits" | "visit_plan_items" => CachedCollection::VisitPlans,
            "company_settings" | "app_settings" => CachedCollection::Settings,
            _ => return None,
        };
        Some(derived)
    }
}

/// Collections to refetch for one reconciliation pass, deduplicated in
/// first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefetchPlan {
    pub collections: Vec<CachedCollection>,
    pub unknown: Vec<String>,
}

impl RefetchPlan {
    pub fn from_changed<S: AsRef<str>>(changed: &[S]) -> Self {
        let mut plan = RefetchPlan::default();
        for entity in changed {
            let entity = entity.as_ref();
            match CachedCollection::for_entity(entity) {
                Some(collection) if !plan.collections.contains(&collection) => {
                    plan.collections.push(collection)
                }
                Some(_) => {}
                None => plan.unknown.push(entity.to_string()),
            }
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<CachedCollection>,
    pub failed: Vec<(CachedCollection, ApiError)>,
}

pub struct CacheRefresher {
    client: ApiClient,
}

impl CacheRefresher {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Refetch every collection in `plan` and store its data. One failing
    /// collection does not stop the rest; an expired session does.
    pub async fn apply(&self, plan: &RefetchPlan) -> RefreshReport {
        let mut report = RefreshReport::default();
        for entity in &plan.unknown {
            warn!(entity = %entity, "no cached collection for changed entity");
        }

        for &collection in &plan.collections {
            match self.refetch(collection).await {
                Ok(count) => {
                    info!(collection = collection.name(), count, "cache refreshed");
                    report.refreshed.push(collection);
                }
                Err(e) => {
                    warn!(collection = collection.name(), error = %e, "cache refresh failed");
                    let stop = e.is_session_expired();
                    report.failed.push((collection, e));
                    if stop {
                        break;
                    }
                }
            }
        }

        if !report.refreshed.is_empty() || !report.failed.is_empty() {
            self.client.events().emit(ClientEvent::CacheRefreshed {
                refreshed: report.refreshed.iter().map(|c| c.name().to_string()).collect(),
                failed: report.failed.iter().map(|(c, _)| c.name().to_string()).collect(),
            });
        }
        report
    }

    /// Refetch one collection, returning the number of rows stored.
    pub async fn refetch(&self, collection: CachedCollection) -> Result<usize, ApiError> {
        let data: Value = self.client.get_data(&collection.endpoint()).await?;
        let count = data.as_array().map(Vec::len).unwrap_or(1);
        store::write_json(self.client.store().as_ref(), &collection.cache_key(), &data)?;
        Ok(count)
    }

    pub fn cached(&self, collection: CachedCollection) -> Option<Value> {
        store::read_json(self.client.store().as_ref(), &collection.cache_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_entities_coalesce_into_parent() {
        let plan = RefetchPlan::from_changed(&["product_variants", "products", "product_units"]);
        assert_eq!(plan.collections, vec![CachedCollection::Products]);
        assert!(plan.unknown.is_empty());
    }

    #[test]
    fn test_plan_keeps_first_seen_order_and_reports_unknown() {
        let plan = RefetchPlan::from_changed(&["safes", "reports_cache", "clients", "client_areas"]);
        assert_eq!(
            plan.collections,
            vec![CachedCollection::Safes, CachedCollection::Clients]
        );
        assert_eq!(plan.unknown, vec!["reports_cache".to_string()]);
    }

    #[test]
    fn test_collection_keys_and_endpoints() {
        assert_eq!(
            CachedCollection::VisitPlans.endpoint(),
            "visit_plans/get_all.php"
        );
        assert_eq!(CachedCollection::Products.cache_key(), "cache:products");
        assert_eq!(
            CachedCollection::for_entity(" Products "),
            Some(CachedCollection::Products)
        );
        assert!(RefetchPlan::from_changed::<&str>(&[]).is_empty());
    }
}
