//! Corrective actions for a single cluster.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::desired::DesiredState;
use crate::error::ProviderResult;
use crate::provider::{ProviderCluster, ProviderGateway};

/// A reconciliation key together with its current provider state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterObject {
    pub name: String,
    /// `None` when the provider has no cluster with this name.
    pub current: Option<ProviderCluster>,
}

impl ClusterObject {
    /// Provider ID, if the cluster exists.
    pub fn id(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|c| c.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

/// Result of a handler call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Deleted,
    /// Nothing to do.
    Unchanged,
    /// Delete skipped because dangerous mode is off.
    Refused,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Deleted => "deleted",
            Outcome::Unchanged => "unchanged",
            Outcome::Refused => "refused",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies create/delete actions. Errors are returned unchanged so the worker
/// pool's retry policy applies to every path.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn add(&self, object: &ClusterObject) -> ProviderResult<Outcome>;

    /// `object.current` is the cluster to remove.
    async fn delete(&self, object: &ClusterObject) -> ProviderResult<Outcome>;
}

/// Handler that creates missing clusters and, in dangerous mode, deletes
/// undesired ones.
pub struct ClusterHandler {
    provider: Arc<dyn ProviderGateway>,
    desired: Arc<DesiredState>,
    dangerous: bool,
}

impl ClusterHandler {
    pub fn new(
        provider: Arc<dyn ProviderGateway>,
        desired: Arc<DesiredState>,
        dangerous: bool,
    ) -> Self {
        Self {
            provider,
            desired,
            dangerous,
        }
    }
}

#[async_trait]
impl Handler for ClusterHandler {
    async fn add(&self, object: &ClusterObject) -> ProviderResult<Outcome> {
        // A cluster the provider reports counts as present even before it has an ID.
        if object.current.is_some() {
            return Ok(Outcome::Unchanged);
        }

        // Node count comes from the snapshot current at handling time.
        let snapshot = self.desired.snapshot();
        let Some(cluster) = snapshot.get(&object.name) else {
            info!(cluster = %object.name, "Cluster no longer desired, not creating");
            return Ok(Outcome::Unchanged);
        };

        info!(cluster = %cluster.name, nodes = ?cluster.nodes, "Creating cluster");
        self.provider.create_cluster(cluster).await?;
        Ok(Outcome::Created)
    }

    async fn delete(&self, object: &ClusterObject) -> ProviderResult<Outcome> {
        let Some(id) = object.id() else {
            return Ok(Outcome::Unchanged);
        };

        // The event may predate a reload that made the name desired again.
        if self.desired.snapshot().contains(&object.name) {
            info!(cluster = %object.name, "Cluster is desired again, not deleting");
            return Ok(Outcome::Unchanged);
        }

        if !self.dangerous {
            warn!(cluster = %object.name, id = %id, "Dangerous mode disabled, not deleting cluster");
            return Ok(Outcome::Refused);
        }

        info!(cluster = %object.name, id = %id, "Deleting cluster");
        self.provider.delete_cluster(id).await?;
        Ok(Outcome::Deleted)
    }
}
