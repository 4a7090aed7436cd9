//! Reconciliation cache: resolves the provider-side state of one key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::ProviderResult;
use crate::provider::{ProviderCluster, ProviderGateway};

/// Fetches the current representation of an entity by key.
#[async_trait]
pub trait Storage: Send + Sync {
    /// `Ok(None)` means the provider has no such cluster.
    async fn get(&self, key: &str) -> ProviderResult<Option<ProviderCluster>>;
}

/// Last observed provider state for a key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub cluster: ProviderCluster,
    pub fetched_at: DateTime<Utc>,
}

/// [`Storage`] backed by live provider lookups.
///
/// Every `get` goes to the provider; the recorded entries only describe what
/// was seen last and are never returned in place of a lookup. A lookup that
/// finds nothing drops the entry, so entries are bounded by the clusters that
/// existed at their last lookup.
pub struct ProviderStorage {
    provider: Arc<dyn ProviderGateway>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ProviderStorage {
    pub fn new(provider: Arc<dyn ProviderGateway>) -> Self {
        Self {
            provider,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn last_known(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl Storage for ProviderStorage {
    async fn get(&self, key: &str) -> ProviderResult<Option<ProviderCluster>> {
        let cluster = self.provider.get_cluster(key).await?;
        debug!(
            cluster = %key,
            found = cluster.is_some(),
            "Resolved provider state"
        );

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match &cluster {
            Some(found) => {
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        cluster: found.clone(),
                        fetched_at: Utc::now(),
                    },
                );
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{InMemoryProvider, ProviderOp};

    #[tokio::test]
    async fn absent_cluster_is_none() {
        let storage = ProviderStorage::new(Arc::new(InMemoryProvider::new()));
        assert!(storage.get("c").await.unwrap().is_none());
        assert!(storage.last_known("c").is_none());
    }

    #[tokio::test]
    async fn entry_is_dropped_once_cluster_is_gone() {
        let provider = Arc::new(InMemoryProvider::with_clusters(&["a", "b"]));
        let storage = ProviderStorage::new(provider.clone());
        storage.get("a").await.unwrap();
        storage.get("b").await.unwrap();
        assert!(storage.last_known("b").is_some());

        provider.remove("b");
        assert!(storage.get("b").await.unwrap().is_none());

        assert!(storage.last_known("b").is_none());
        assert_eq!(storage.last_known("a").unwrap().cluster.name, "a");
    }

    #[tokio::test]
    async fn every_get_sees_current_provider_state() {
        let provider = Arc::new(InMemoryProvider::with_clusters(&["a"]));
        let storage = ProviderStorage::new(provider.clone());

        let first = storage.get("a").await.unwrap().unwrap();
        assert!(!first.id.is_empty());

        provider.remove("a");
        assert!(storage.get("a").await.unwrap().is_none());

        let id = provider.insert("a", 5);
        let again = storage.get("a").await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.nodes, 5);
    }

    #[tokio::test]
    async fn lookup_error_keeps_previous_entry() {
        let provider = Arc::new(InMemoryProvider::with_clusters(&["a"]));
        let storage = ProviderStorage::new(provider.clone());
        storage.get("a").await.unwrap();

        provider.set_failing(ProviderOp::Get, true);
        assert!(storage.get("a").await.is_err());

        let entry = storage.last_known("a").unwrap();
        assert_eq!(entry.cluster.name, "a");
    }
}
