//! Built-in capability registry.
//!
//! The set of built-in capabilities is a static table keyed by
//! [`CapabilityKind`]. Each entry has an availability predicate evaluated
//! against the current [`ProviderAvailability`] every time the registered
//! set is computed. [`CapabilityRegistry::reconcile`] mirrors that set into
//! the store in a single transaction, and [`CapabilityRegistry::lookup`]
//! resolves persisted ids back to kinds through a cache owned by the
//! registry instance.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{LifecycleError, Result};
use crate::models::CapabilityRecord;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CapabilityKind {
    Search,
    ImageGeneration,
    InternetSearch,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Search,
        CapabilityKind::ImageGeneration,
        CapabilityKind::InternetSearch,
    ];

    /// Stable id stored alongside the persisted record.
    pub fn in_code_id(&self) -> &'static str {
        match self {
            CapabilityKind::Search => "SearchTool",
            CapabilityKind::ImageGeneration => "ImageGenerationTool",
            CapabilityKind::InternetSearch => "InternetSearchTool",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CapabilityKind::Search => "Internal Search",
            CapabilityKind::ImageGeneration => "Image Generation",
            CapabilityKind::InternetSearch => "Internet Search",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CapabilityKind::Search => {
                "The Search Action allows the Assistant to search through connected knowledge to help build an answer."
            }
            CapabilityKind::ImageGeneration => {
                "The Image Generation Action allows the assistant to use DALL-E 3 or GPT-IMAGE-1 to generate images. \
                 The action will be used when the user asks the assistant to generate an image."
            }
            CapabilityKind::InternetSearch => {
                "The Internet Search Action allows the assistant to perform internet searches for up-to-date information."
            }
        }
    }

    pub fn from_in_code_id(id: &str) -> Option<CapabilityKind> {
        CapabilityKind::ALL
            .into_iter()
            .find(|k| k.in_code_id() == id)
    }

    fn is_available(&self, providers: &ProviderAvailability) -> bool {
        match self {
            CapabilityKind::InternetSearch => providers.has_internet_search(),
            CapabilityKind::Search | CapabilityKind::ImageGeneration => true,
        }
    }

    pub fn record(&self) -> CapabilityRecord {
        CapabilityRecord {
            in_code_id: self.in_code_id().to_string(),
            name: self.in_code_id().to_string(),
            display_name: self.display_name().to_string(),
            description: self.description().to_string(),
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.in_code_id())
    }
}

/// Backing providers configured for this deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderAvailability {
    pub internet_search_providers: Vec<String>,
}

impl ProviderAvailability {
    pub fn has_internet_search(&self) -> bool {
        self.internet_search_providers
            .iter()
            .any(|p| !p.trim().is_empty())
    }
}

/// Changes needed to make the persisted records match the registered set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub added: Vec<CapabilityRecord>,
    pub updated: Vec<CapabilityRecord>,
    pub removed: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Diff `registered` against `persisted`. A registered record that already
/// exists lands in `updated` only when one of its fields differs from the
/// persisted row, so reconciling an unchanged deployment is a no-op.
pub fn plan_reconciliation(
    registered: &[CapabilityRecord],
    persisted: &[CapabilityRecord],
) -> ReconcilePlan {
    let existing: HashMap<&str, &CapabilityRecord> = persisted
        .iter()
        .map(|r| (r.in_code_id.as_str(), r))
        .collect();
    let wanted: BTreeSet<&str> = registered.iter().map(|r| r.in_code_id.as_str()).collect();

    let mut plan = ReconcilePlan::default();
    for record in registered {
        match existing.get(record.in_code_id.as_str()) {
            Some(current) if *current == record => {}
            Some(_) => plan.updated.push(record.clone()),
            None => plan.added.push(record.clone()),
        }
    }
    plan.removed = persisted
        .iter()
        .filter(|r| !wanted.contains(r.in_code_id.as_str()))
        .map(|r| r.in_code_id.clone())
        .collect();
    plan
}

pub struct CapabilityRegistry {
    store: Arc<dyn DocumentStore>,
    cache: RwLock<Option<HashMap<String, CapabilityKind>>>,
}

impl CapabilityRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
        }
    }

    /// Capabilities whose availability predicate holds for `providers`.
    pub fn registered(providers: &ProviderAvailability) -> Vec<CapabilityKind> {
        CapabilityKind::ALL
            .into_iter()
            .filter(|k| k.is_available(providers))
            .collect()
    }

    /// Mirror the registered set into the store: add missing records,
    /// rewrite changed ones, drop records no longer registered. All
    /// changes commit together.
    pub async fn reconcile(&self, providers: &ProviderAvailability) -> Result<ReconcilePlan> {
        let registered: Vec<CapabilityRecord> = Self::registered(providers)
            .iter()
            .map(CapabilityKind::record)
            .collect();
        let persisted = self.store.list_capabilities().await?;
        let plan = plan_reconciliation(&registered, &persisted);

        let mut tx = self.store.begin().await?;
        for record in &plan.added {
            tx.upsert_capability(record).await?;
        }
        for record in &plan.updated {
            tx.upsert_capability(record).await?;
        }
        for id in &plan.removed {
            tx.delete_capability(id).await?;
        }
        tx.commit().await?;

        for record in &plan.added {
            info!(capability = %record.in_code_id, "added built-in capability");
        }
        for record in &plan.updated {
            debug!(capability = %record.in_code_id, "updated built-in capability");
        }
        for id in &plan.removed {
            info!(capability = %id, "removed capability no longer built in");
        }
        info!(
            added = plan.added.len(),
            updated = plan.updated.len(),
            removed = plan.removed.len(),
            "built-in capabilities reconciled"
        );

        self.invalidate();
        Ok(plan)
    }

    /// Resolve a persisted id. A miss rebuilds the cache once and retries.
    pub async fn lookup(&self, in_code_id: &str) -> Result<CapabilityKind> {
        if let Some(kind) = self.cached(in_code_id) {
            return Ok(kind);
        }
        self.refresh().await?;
        self.cached(in_code_id)
            .ok_or_else(|| LifecycleError::not_found("capability", in_code_id))
    }

    /// Rebuild the cache wholesale from persisted records.
    pub async fn refresh(&self) -> Result<()> {
        let records = self.store.list_capabilities().await?;
        let rebuilt: HashMap<String, CapabilityKind> = records
            .into_iter()
            .filter_map(|r| CapabilityKind::from_in_code_id(&r.in_code_id).map(|k| (r.in_code_id, k)))
            .collect();
        debug!(entries = rebuilt.len(), "capability cache rebuilt");
        *self.cache.write().unwrap_or_else(|p| p.into_inner()) = Some(rebuilt);
        Ok(())
    }

    pub fn invalidate(&self) {
        *self.cache.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Persisted records by id, for listing.
    pub async fn persisted(&self) -> Result<BTreeMap<String, CapabilityRecord>> {
        Ok(self
            .store
            .list_capabilities()
            .await?
            .into_iter()
            .map(|r| (r.in_code_id.clone(), r))
            .collect())
    }

    fn cached(&self, in_code_id: &str) -> Option<CapabilityKind> {
        self.cache
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .and_then(|map| map.get(in_code_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn record(id: &str, display: &str) -> CapabilityRecord {
        CapabilityRecord {
            in_code_id: id.into(),
            name: id.into(),
            display_name: display.into(),
            description: String::new(),
        }
    }

    #[test]
    fn test_plan_add_update_remove() {
        let registered = vec![record("A", "A v2"), record("B", "B")];
        let persisted = vec![record("A", "A v1"), record("C", "C")];

        let plan = plan_reconciliation(&registered, &persisted);

        assert_eq!(plan.added, vec![record("B", "B")]);
        assert_eq!(plan.updated, vec![record("A", "A v2")]);
        assert_eq!(plan.removed, vec!["C".to_string()]);
    }

    #[test]
    fn test_unchanged_records_plan_nothing() {
        let registered: Vec<CapabilityRecord> = CapabilityKind::ALL
            .iter()
            .map(CapabilityKind::record)
            .collect();
        let plan = plan_reconciliation(&registered, &registered);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_image_generation_description_names_models() {
        assert!(CapabilityKind::ImageGeneration
            .description()
            .starts_with("The Image Generation Action allows the assistant to use DALL-E 3 or GPT-IMAGE-1 to generate images. "));
    }

    #[tokio::test]
    async fn test_second_reconcile_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let registry = CapabilityRegistry::new(store.clone());
        let first = registry
            .reconcile(&ProviderAvailability::default())
            .await
            .unwrap();
        assert_eq!(first.added.len(), 2);

        let second = registry
            .reconcile(&ProviderAvailability::default())
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_internet_search_requires_provider() {
        let none = ProviderAvailability::default();
        assert_eq!(
            CapabilityRegistry::registered(&none),
            vec![CapabilityKind::Search, CapabilityKind::ImageGeneration]
        );
        let blank = ProviderAvailability {
            internet_search_providers: vec!["  ".into()],
        };
        assert!(!blank.has_internet_search());

        let exa = ProviderAvailability {
            internet_search_providers: vec!["exa".into()],
        };
        assert!(CapabilityRegistry::registered(&exa).contains(&CapabilityKind::InternetSearch));
    }

    #[tokio::test]
    async fn test_reconcile_persists_registered_set() {
        let store = Arc::new(InMemoryStore::new());
        let mut tx = store.begin().await.unwrap();
        tx.upsert_capability(&record("SearchTool", "Old Name"))
            .await
            .unwrap();
        tx.upsert_capability(&record("RetiredTool", "Retired"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let registry = CapabilityRegistry::new(store.clone());
        let plan = registry
            .reconcile(&ProviderAvailability::default())
            .await
            .unwrap();

        assert_eq!(plan.added.len(), 1);
        assert_eq!(plan.updated.len(), 1);
        assert_eq!(plan.removed, vec!["RetiredTool".to_string()]);

        let persisted = registry.persisted().await.unwrap();
        let ids: Vec<&str> = persisted.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["ImageGenerationTool", "SearchTool"]);
        assert_eq!(persisted["SearchTool"].display_name, "Internal Search");
    }

    #[tokio::test]
    async fn test_reconcile_drops_internet_search_when_provider_removed() {
        let store = Arc::new(InMemoryStore::new());
        let registry = CapabilityRegistry::new(store.clone());
        let exa = ProviderAvailability {
            internet_search_providers: vec!["exa".into()],
        };
        registry.reconcile(&exa).await.unwrap();
        assert_eq!(
            registry.lookup("InternetSearchTool").await.unwrap(),
            CapabilityKind::InternetSearch
        );

        let plan = registry
            .reconcile(&ProviderAvailability::default())
            .await
            .unwrap();
        assert_eq!(plan.removed, vec!["InternetSearchTool".to_string()]);
        assert!(registry.lookup("InternetSearchTool").await.is_err());
    }

    #[tokio::test]
    async fn test_lookup_rebuilds_cache_on_miss() {
        let store = Arc::new(InMemoryStore::new());
        let registry = CapabilityRegistry::new(store.clone());
        registry.refresh().await.unwrap();
        assert!(registry.cached("SearchTool").is_none());

        // Written behind the registry's back; the miss triggers a rebuild.
        let mut tx = store.begin().await.unwrap();
        tx.upsert_capability(&CapabilityKind::Search.record())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            registry.lookup("SearchTool").await.unwrap(),
            CapabilityKind::Search
        );
        let err = registry.lookup("NoSuchTool").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound { .. }));
    }
}
