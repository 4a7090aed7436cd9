//! Live reload of the desired cluster list.
//!
//! [`FileWatcher`] turns file changes into raw notifications; one logical
//! write may show up as several. [`ConfigReloader`] collapses each burst into
//! a single reload once the file has been quiet for the debounce window.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::FileConfig;
use crate::desired::{ConfigSnapshot, DesiredState};
use crate::error::ConfigError;
use crate::metrics::ControllerMetrics;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Modification time and length; `None` while the file is missing.
type Fingerprint = Option<(Option<SystemTime>, u64)>;

async fn fingerprint(path: &Path) -> Fingerprint {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.modified().ok(), meta.len()))
}

/// Polls a file's metadata and notifies on every observed change.
pub struct FileWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    pub fn spawn(
        self,
        tx: mpsc::Sender<()>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last = fingerprint(&self.path).await;
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(path = %self.path.display(), "Watching config file");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let current = fingerprint(&self.path).await;
                if current != last {
                    last = current;
                    debug!(path = %self.path.display(), "Config file changed");
                    // A full channel already holds a pending notification.
                    if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(()) {
                        break;
                    }
                }
            }
            debug!("Config file watcher stopped");
        })
    }
}

/// Re-reads the config file and installs the new cluster list.
pub struct ConfigReloader {
    path: PathBuf,
    desired: Arc<DesiredState>,
    metrics: Arc<ControllerMetrics>,
    debounce: Duration,
}

impl ConfigReloader {
    pub fn new(
        path: impl Into<PathBuf>,
        desired: Arc<DesiredState>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            path: path.into(),
            desired,
            metrics,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Load the file once. On any error the current snapshot stays in place.
    pub async fn reload(&self) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        let config = FileConfig::parse(&self.path, &contents)?;
        Ok(self.desired.replace(config.clusters))
    }

    pub fn spawn(
        self,
        notifications: mpsc::Receiver<()>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(notifications, shutdown))
    }

    async fn run(
        self,
        mut notifications: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut open = true;
        while open {
            tokio::select! {
                n = notifications.recv() => {
                    if n.is_none() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }

            // Absorb the rest of the burst.
            loop {
                tokio::select! {
                    n = tokio::time::timeout(self.debounce, notifications.recv()) => match n {
                        Ok(Some(())) => continue,
                        Ok(None) => {
                            open = false;
                            break;
                        }
                        Err(_) => break,
                    },
                    _ = shutdown.changed() => return,
                }
            }

            match self.reload().await {
                Ok(snapshot) => {
                    info!(
                        path = %self.path.display(),
                        revision = snapshot.revision,
                        "Config reloaded"
                    );
                    self.metrics.config_reload(true);
                }
                Err(e) => {
                    warn!(
                        revision = self.desired.snapshot().revision,
                        "Config reload failed, keeping current clusters: {}", e
                    );
                    self.metrics.config_reload(false);
                }
            }
        }
        debug!("Config reloader stopped");
    }
}

/// Wire a [`FileWatcher`] to a [`ConfigReloader`] for `path`.
pub fn spawn_config_reload(
    path: &Path,
    desired: Arc<DesiredState>,
    metrics: Arc<ControllerMetrics>,
    shutdown: watch::Receiver<bool>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1);
    let watcher = FileWatcher::new(path, DEFAULT_POLL_INTERVAL).spawn(tx, shutdown.clone());
    let reloader = ConfigReloader::new(path, desired, metrics).spawn(rx, shutdown);
    (watcher, reloader)
}
