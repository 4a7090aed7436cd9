//! In-process provider backed by a cluster list in memory.
//!
//! Records every mutating call and can be told to fail individual operations,
//! which is what the controller tests drive it with.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{ProviderCluster, ProviderGateway};
use crate::config::DesiredCluster;
use crate::error::{ProviderError, ProviderResult};

/// Operation classes that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    List,
    Get,
    Create,
    Delete,
}

/// A mutating call observed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Create { name: String, nodes: Option<u32> },
    Delete { id: String },
}

#[derive(Default)]
struct Inner {
    clusters: Vec<ProviderCluster>,
    calls: Vec<ProviderCall>,
    failing: HashSet<ProviderOp>,
}

#[derive(Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that already has one active cluster per name.
    pub fn with_clusters(names: &[&str]) -> Self {
        let provider = Self::new();
        for name in names {
            provider.insert(name, 1);
        }
        provider
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a cluster out-of-band (not recorded as a call). Returns its ID.
    pub fn insert(&self, name: &str, nodes: u32) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().clusters.push(ProviderCluster {
            id: id.clone(),
            name: name.to_string(),
            nodes,
            status: "ACTIVE".to_string(),
            ready: true,
        });
        id
    }

    /// Remove a cluster out-of-band.
    pub fn remove(&self, name: &str) {
        self.lock().clusters.retain(|c| c.name != name);
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().clusters.iter().map(|c| c.name.clone()).collect()
    }

    pub fn cluster(&self, name: &str) -> Option<ProviderCluster> {
        self.lock().clusters.iter().find(|c| c.name == name).cloned()
    }

    /// Mutating calls received so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    pub fn set_failing(&self, op: ProviderOp, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(op);
        } else {
            inner.failing.remove(&op);
        }
    }

    fn check(inner: &Inner, op: ProviderOp) -> ProviderResult<()> {
        if inner.failing.contains(&op) {
            return Err(ProviderError::Unavailable(format!("{op:?} failure injected")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderGateway for InMemoryProvider {
    async fn list_clusters(&self) -> ProviderResult<Vec<ProviderCluster>> {
        let inner = self.lock();
        Self::check(&inner, ProviderOp::List)?;
        Ok(inner.clusters.clone())
    }

    async fn get_cluster(&self, name: &str) -> ProviderResult<Option<ProviderCluster>> {
        let inner = self.lock();
        Self::check(&inner, ProviderOp::Get)?;
        Ok(inner.clusters.iter().find(|c| c.name == name).cloned())
    }

    async fn create_cluster(&self, cluster: &DesiredCluster) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.calls.push(ProviderCall::Create {
            name: cluster.name.clone(),
            nodes: cluster.nodes,
        });
        Self::check(&inner, ProviderOp::Create)?;
        if inner.clusters.iter().any(|c| c.name == cluster.name) {
            return Err(ProviderError::Status {
                status: 409,
                body: format!("cluster name {} already taken", cluster.name),
            });
        }
        inner.clusters.push(ProviderCluster {
            id: Uuid::new_v4().to_string(),
            name: cluster.name.clone(),
            nodes: cluster.nodes.unwrap_or(3),
            status: "BUILDING".to_string(),
            ready: false,
        });
        Ok(())
    }

    async fn delete_cluster(&self, id: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.calls.push(ProviderCall::Delete { id: id.to_string() });
        Self::check(&inner, ProviderOp::Delete)?;
        let before = inner.clusters.len();
        inner.clusters.retain(|c| c.id != id);
        if inner.clusters.len() == before {
            return Err(ProviderError::Status {
                status: 404,
                body: format!("cluster {id} not found"),
            });
        }
        Ok(())
    }
}
