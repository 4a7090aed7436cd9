//! Drift detection: a one-shot listing of desired names plus a polling loop
//! that compares the desired set with what the provider reports.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::desired::DesiredState;
use crate::error::ProviderResult;
use crate::metrics::ControllerMetrics;
use crate::provider::ProviderGateway;

/// Capacity of the channel between the polling loop and the worker queue.
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Deleted,
}

impl EventKind {
    /// Label value used in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "add",
            EventKind::Deleted => "delete",
        }
    }
}

/// A detected difference between desired and observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftEvent {
    /// A desired cluster that should exist.
    Added { name: String },
    /// A provider cluster that is not desired.
    Deleted { name: String, id: String },
}

impl DriftEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DriftEvent::Added { .. } => EventKind::Added,
            DriftEvent::Deleted { .. } => EventKind::Deleted,
        }
    }

    /// Reconciliation key (the cluster name).
    pub fn key(&self) -> &str {
        match self {
            DriftEvent::Added { name } | DriftEvent::Deleted { name, .. } => name,
        }
    }
}

impl fmt::Display for DriftEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftEvent::Added { name } => write!(f, "added {name}"),
            DriftEvent::Deleted { name, id } => write!(f, "deleted {name} ({id})"),
        }
    }
}

/// Source of work for the controller.
#[async_trait]
pub trait ListerWatcher: Send + Sync {
    /// Keys to reconcile once at startup.
    async fn list(&self) -> ProviderResult<Vec<String>>;

    /// Start watching; events arrive on the returned channel until `shutdown`
    /// flips to `true`.
    async fn watch(&self, shutdown: watch::Receiver<bool>)
        -> ProviderResult<mpsc::Receiver<DriftEvent>>;
}

/// Difference between a desired and an observed name set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drift {
    /// Observed but not desired.
    pub extra: Vec<String>,
    /// Desired but not observed.
    pub missing: Vec<String>,
}

/// Set difference in both directions. Order follows the input order.
pub fn diff(desired: &[String], observed: &[String]) -> Drift {
    let want: HashSet<&str> = desired.iter().map(String::as_str).collect();
    let have: HashSet<&str> = observed.iter().map(String::as_str).collect();

    Drift {
        extra: dedup(observed.iter().filter(|n| !want.contains(n.as_str()))),
        missing: dedup(desired.iter().filter(|n| !have.contains(n.as_str()))),
    }
}

fn dedup<'a>(names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen: HashSet<&'a str> = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        if seen.insert(name.as_str()) {
            out.push(name.clone());
        }
    }
    out
}

/// Polls the provider and emits one event per drifted cluster.
pub struct DriftDetector {
    desired: Arc<DesiredState>,
    provider: Arc<dyn ProviderGateway>,
    metrics: Arc<ControllerMetrics>,
    interval: Duration,
    recreate_missing: bool,
}

impl DriftDetector {
    pub fn new(
        desired: Arc<DesiredState>,
        provider: Arc<dyn ProviderGateway>,
        metrics: Arc<ControllerMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            desired,
            provider,
            metrics,
            interval,
            recreate_missing: true,
        }
    }

    /// Whether desired clusters missing at the provider are re-emitted as
    /// `Added` on every cycle.
    pub fn recreate_missing(mut self, enabled: bool) -> Self {
        self.recreate_missing = enabled;
        self
    }

    /// Compute the events for one cycle.
    ///
    /// Fails only when listing the provider fails; a failed ID lookup skips
    /// that one name.
    pub async fn detect(&self) -> ProviderResult<Vec<DriftEvent>> {
        // Listing
        let snapshot = self.desired.snapshot();
        let desired = snapshot.names();
        let observed = self.provider.list_cluster_names().await?;

        // Diffing
        let drift = diff(&desired, &observed);
        debug!(
            revision = snapshot.revision,
            desired = desired.len(),
            observed = observed.len(),
            extra = drift.extra.len(),
            missing = drift.missing.len(),
            "Drift computed"
        );

        let mut events = Vec::with_capacity(drift.extra.len() + drift.missing.len());
        for name in drift.extra {
            match self.provider.get_cluster_id(&name).await {
                Ok(id) if id.is_empty() => {
                    debug!(cluster = %name, "Extra cluster vanished before lookup");
                }
                Ok(id) => events.push(DriftEvent::Deleted { name, id }),
                Err(e) => warn!(cluster = %name, "Failed to resolve cluster ID: {}", e),
            }
        }
        if self.recreate_missing {
            events.extend(drift.missing.into_iter().map(|name| DriftEvent::Added { name }));
        }
        Ok(events)
    }

    /// Run one Listing/Diffing/Emitting cycle. Returns the number of events
    /// sent, or `None` if the cycle was skipped or shutdown interrupted it.
    async fn cycle(
        &self,
        tx: &mpsc::Sender<DriftEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<usize> {
        let events = match self.detect().await {
            Ok(events) => events,
            Err(e) => {
                warn!("Listing clusters failed, skipping cycle: {}", e);
                self.metrics.list_error();
                return None;
            }
        };

        // Emitting
        let count = events.len();
        for event in events {
            self.metrics.drift_event(event.kind());
            debug!(event = %event, "Emitting drift event");
            tokio::select! {
                sent = tx.send(event) => {
                    if sent.is_err() {
                        return None;
                    }
                }
                _ = shutdown.changed() => return None,
            }
        }
        Some(count)
    }
}

#[async_trait]
impl ListerWatcher for DriftDetector {
    async fn list(&self) -> ProviderResult<Vec<String>> {
        Ok(self.desired.snapshot().names())
    }

    async fn watch(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> ProviderResult<mpsc::Receiver<DriftEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let detector = Self {
            desired: Arc::clone(&self.desired),
            provider: Arc::clone(&self.provider),
            metrics: Arc::clone(&self.metrics),
            interval: self.interval,
            recreate_missing: self.recreate_missing,
        };

        tokio::spawn(async move {
            info!(interval = ?detector.interval, "Drift detector started");
            // `list()` covers startup, so the first cycle waits one period.
            let mut ticker = interval_at(Instant::now() + detector.interval, detector.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if let Some(count) = detector.cycle(&tx, &mut shutdown).await {
                    if count > 0 {
                        info!("Drift detected: {} event(s) emitted", count);
                    }
                }
                if tx.is_closed() {
                    break;
                }
            }
            info!("Drift detector stopped");
        });

        Ok(rx)
    }
}
