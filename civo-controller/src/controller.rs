//! Controller core: a fixed pool of workers draining one shared work queue.
//!
//! The queue is fed once by `ListerWatcher::list` at startup and then by the
//! watch stream. Each item resolves the cluster's provider state through the
//! [`Storage`], hands it to the [`Handler`], and is retried with a fixed delay
//! until `max_retries` is exhausted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::handler::{ClusterObject, Handler, Outcome};
use crate::lister::{DriftEvent, ListerWatcher};
use crate::metrics::ControllerMetrics;
use crate::storage::Storage;

pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Everything needed to build a [`Controller`].
pub struct ControllerConfig {
    pub name: String,
    pub workers: usize,
    pub max_retries: u32,
    /// Fixed wait before a failed item is re-queued.
    pub retry_delay: Duration,
    pub lister_watcher: Arc<dyn ListerWatcher>,
    pub storage: Arc<dyn Storage>,
    pub handler: Arc<dyn Handler>,
    pub metrics: Arc<ControllerMetrics>,
}

#[derive(Debug, Clone)]
struct WorkItem {
    event: DriftEvent,
    /// Number of failed attempts so far.
    attempt: u32,
}

/// State shared by all workers.
struct Shared {
    name: String,
    max_retries: u32,
    retry_delay: Duration,
    storage: Arc<dyn Storage>,
    handler: Arc<dyn Handler>,
    metrics: Arc<ControllerMetrics>,
    queue_tx: mpsc::UnboundedSender<WorkItem>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    /// Names with an `Added` item queued or in flight.
    pending: std::sync::Mutex<HashSet<String>>,
}

impl Shared {
    /// Queue a fresh event. A second `Added` for a name that is still pending
    /// is dropped.
    fn enqueue(&self, event: DriftEvent) {
        if let DriftEvent::Added { name } = &event {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if !pending.insert(name.clone()) {
                debug!(cluster = %name, "Create check already pending, skipping");
                return;
            }
        }
        self.push(WorkItem { event, attempt: 0 });
    }

    fn push(&self, item: WorkItem) {
        self.metrics.queue_push();
        if let Err(e) = self.queue_tx.send(item) {
            self.metrics.queue_pop();
            error!(controller = %self.name, "Work queue closed, dropping {}", e.0.event);
        }
    }

    fn release(&self, event: &DriftEvent) {
        if let DriftEvent::Added { name } = event {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(name);
        }
    }

    async fn next(&self) -> Option<WorkItem> {
        self.queue_rx.lock().await.recv().await
    }

    /// Resolve current state and dispatch to the handler.
    async fn handle(&self, event: &DriftEvent) -> Result<Outcome, ControllerError> {
        match event {
            DriftEvent::Added { name } => {
                let current = self.storage.get(name).await?;
                let object = ClusterObject {
                    name: name.clone(),
                    current,
                };
                Ok(self.handler.add(&object).await?)
            }
            DriftEvent::Deleted { name, id } => match self.storage.get(name).await? {
                None => {
                    debug!(cluster = %name, "Cluster already gone, nothing to delete");
                    Ok(Outcome::Unchanged)
                }
                Some(mut current) => {
                    // Prefer the freshly resolved ID over the one captured at detection.
                    if current.id.is_empty() {
                        current.id = id.clone();
                    }
                    let object = ClusterObject {
                        name: name.clone(),
                        current: Some(current),
                    };
                    Ok(self.handler.delete(&object).await?)
                }
            },
        }
    }

    async fn process(&self, item: WorkItem, shutdown: &mut watch::Receiver<bool>) {
        let kind = item.event.kind();
        match self.handle(&item.event).await {
            Ok(outcome) => {
                debug!(event = %item.event, outcome = %outcome, "Handled");
                self.metrics.outcome(outcome.as_str());
                self.metrics.success(kind);
                self.release(&item.event);
            }
            Err(e) if item.attempt < self.max_retries => {
                warn!(
                    event = %item.event,
                    attempt = item.attempt + 1,
                    "Handling failed, retrying in {:?}: {}",
                    self.retry_delay,
                    e
                );
                self.metrics.retry(kind);
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    _ = shutdown.changed() => {
                        self.release(&item.event);
                        return;
                    }
                }
                self.push(WorkItem {
                    event: item.event,
                    attempt: item.attempt + 1,
                });
            }
            Err(e) => {
                error!(
                    event = %item.event,
                    attempts = item.attempt + 1,
                    "Dropping item after exhausting retries: {}",
                    e
                );
                self.metrics.failure(kind);
                self.release(&item.event);
            }
        }
    }
}

/// Runs the list/watch source and the worker pool until shutdown.
pub struct Controller {
    workers: usize,
    lister_watcher: Arc<dyn ListerWatcher>,
    shared: Arc<Shared>,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        if config.name.trim().is_empty() {
            return Err(ControllerError::InvalidConfig("name must not be empty".into()));
        }
        if config.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "at least one worker is required".into(),
            ));
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Ok(Self {
            workers: config.workers,
            lister_watcher: config.lister_watcher,
            shared: Arc::new(Shared {
                name: config.name,
                max_retries: config.max_retries,
                retry_delay: config.retry_delay,
                storage: config.storage,
                handler: config.handler,
                metrics: config.metrics,
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                pending: std::sync::Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Run until `shutdown` becomes `true` (or its sender is dropped).
    ///
    /// Fails only if the initial list or starting the watch fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let shared = self.shared;
        info!(
            "Starting controller {} with {} workers (max retries {})",
            shared.name, self.workers, shared.max_retries
        );

        let keys = self
            .lister_watcher
            .list()
            .await
            .map_err(ControllerError::List)?;
        info!("Initial list: {} desired clusters", keys.len());
        for name in keys {
            shared.enqueue(DriftEvent::Added { name });
        }

        let events = self
            .lister_watcher
            .watch(shutdown.clone())
            .await
            .map_err(ControllerError::List)?;
        let forwarder = tokio::spawn(forward(events, Arc::clone(&shared), shutdown.clone()));

        let handles: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|id| tokio::spawn(worker(id, Arc::clone(&shared), shutdown.clone())))
            .collect();

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("Stopping controller {}", shared.name);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }
        let _ = forwarder.await;
        info!("Controller {} stopped", shared.name);
        Ok(())
    }
}

/// Move watch events into the work queue.
async fn forward(
    mut events: mpsc::Receiver<DriftEvent>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => shared.enqueue(event),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("Event forwarder stopped");
}

async fn worker(id: usize, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = id, "Worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let item = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            item = shared.next() => item,
        };
        let Some(item) = item else {
            break;
        };
        shared.metrics.queue_pop();
        shared.process(item, &mut shutdown).await;
    }
    debug!(worker = id, "Worker stopped");
}
