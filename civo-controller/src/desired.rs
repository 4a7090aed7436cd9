//! Desired-state source: the latest fully-loaded cluster list.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::DesiredCluster;

/// Subscribers that fall this far behind skip to the newest snapshots.
const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Immutable view of the desired cluster set.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub revision: u64,
    pub loaded_at: DateTime<Utc>,
    pub clusters: Vec<DesiredCluster>,
}

impl ConfigSnapshot {
    pub fn names(&self) -> Vec<String> {
        self.clusters.iter().map(|c| c.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&DesiredCluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Owner of the current [`ConfigSnapshot`].
///
/// Readers get an `Arc` clone under a short read lock, so they never see a
/// half-written list. A reload swaps the whole snapshot and broadcasts it.
pub struct DesiredState {
    current: RwLock<Arc<ConfigSnapshot>>,
    updates: broadcast::Sender<Arc<ConfigSnapshot>>,
}

impl DesiredState {
    pub fn new(clusters: Vec<DesiredCluster>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot {
                revision: 1,
                loaded_at: Utc::now(),
                clusters,
            })),
            updates,
        }
    }

    /// Latest snapshot. Never blocks on a reload in progress for longer than
    /// the pointer swap.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    /// Receive every snapshot installed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ConfigSnapshot>> {
        self.updates.subscribe()
    }

    /// Install a new cluster list as the next revision.
    pub fn replace(&self, clusters: Vec<DesiredCluster>) -> Arc<ConfigSnapshot> {
        let snapshot = {
            let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
            let next = Arc::new(ConfigSnapshot {
                revision: guard.revision + 1,
                loaded_at: Utc::now(),
                clusters,
            });
            *guard = Arc::clone(&next);
            next
        };

        info!(
            revision = snapshot.revision,
            clusters = snapshot.clusters.len(),
            "New config loaded"
        );
        // No subscribers is fine; the snapshot is still readable.
        let _ = self.updates.send(Arc::clone(&snapshot));
        snapshot
    }
}
