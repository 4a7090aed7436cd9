//! Provider gateway: the narrow capability surface the controller needs from
//! the cloud API.
//!
//! - `civo`: REST client for the Civo Kubernetes API
//! - `memory`: in-process provider for tests and dry runs

pub mod civo;
pub mod memory;

pub use civo::CivoClient;
pub use memory::{InMemoryProvider, ProviderCall, ProviderOp};

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::DesiredCluster;
use crate::error::ProviderResult;

/// A cluster as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderCluster {
    /// Provider-assigned identifier; empty until the provider assigns one.
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, rename = "num_target_nodes")]
    pub nodes: u32,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ready: bool,
}

/// Operations the controller performs against the provider.
///
/// Every call may fail; callers treat any error as transient. A cluster that
/// does not exist is a normal negative result (`Ok(None)` / `Ok("")`).
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// List every cluster visible to the credential.
    async fn list_clusters(&self) -> ProviderResult<Vec<ProviderCluster>>;

    /// Names of every cluster.
    async fn list_cluster_names(&self) -> ProviderResult<Vec<String>> {
        Ok(self
            .list_clusters()
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect())
    }

    /// Look up one cluster by name.
    async fn get_cluster(&self, name: &str) -> ProviderResult<Option<ProviderCluster>> {
        Ok(self
            .list_clusters()
            .await?
            .into_iter()
            .find(|c| c.name == name))
    }

    /// Provider ID for `name`, or an empty string when it does not exist.
    async fn get_cluster_id(&self, name: &str) -> ProviderResult<String> {
        Ok(self
            .get_cluster(name)
            .await?
            .map(|c| c.id)
            .unwrap_or_default())
    }

    async fn create_cluster(&self, cluster: &DesiredCluster) -> ProviderResult<()>;

    async fn delete_cluster(&self, id: &str) -> ProviderResult<()>;
}
