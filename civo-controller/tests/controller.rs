//! End-to-end tests: drift detector, worker pool and handler wired together
//! against the in-memory provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use civo_controller::provider::{ProviderCall, ProviderOp};
use civo_controller::{
    ClusterHandler, ClusterObject, Controller, ControllerConfig, ControllerMetrics,
    DesiredCluster, DesiredState, DriftDetector, DriftEvent, EventKind, Handler,
    InMemoryProvider, ListerWatcher, Outcome, ProviderError, ProviderResult, ProviderStorage,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const POLL: Duration = Duration::from_millis(20);

struct Harness {
    provider: Arc<InMemoryProvider>,
    desired: Arc<DesiredState>,
    metrics: Arc<ControllerMetrics>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), civo_controller::ControllerError>>,
}

impl Harness {
    fn start(
        desired: Vec<DesiredCluster>,
        provider: InMemoryProvider,
        dangerous: bool,
        workers: usize,
    ) -> Self {
        let provider = Arc::new(provider);
        let desired = Arc::new(DesiredState::new(desired));
        let metrics = Arc::new(ControllerMetrics::new().unwrap());
        let detector = DriftDetector::new(
            desired.clone(),
            provider.clone(),
            metrics.clone(),
            POLL,
        );
        let controller = Controller::new(ControllerConfig {
            name: "test".to_string(),
            workers,
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
            lister_watcher: Arc::new(detector),
            storage: Arc::new(ProviderStorage::new(provider.clone())),
            handler: Arc::new(ClusterHandler::new(
                provider.clone(),
                desired.clone(),
                dangerous,
            )),
            metrics: metrics.clone(),
        })
        .unwrap();

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(rx));
        Self {
            provider,
            desired,
            metrics,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("controller did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

/// Poll `cond` until it holds or two seconds pass.
async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn creates(calls: &[ProviderCall]) -> Vec<&ProviderCall> {
    calls
        .iter()
        .filter(|c| matches!(c, ProviderCall::Create { .. }))
        .collect()
}

fn deletes(calls: &[ProviderCall]) -> Vec<&ProviderCall> {
    calls
        .iter()
        .filter(|c| matches!(c, ProviderCall::Delete { .. }))
        .collect()
}

#[tokio::test]
async fn missing_cluster_is_created_exactly_once() {
    let h = Harness::start(
        vec![DesiredCluster::new("a", 3), DesiredCluster::new("c", 1)],
        InMemoryProvider::with_clusters(&["a"]),
        false,
        3,
    );

    assert!(wait_for(|| h.provider.cluster("c").is_some()).await);
    // Several more poll cycles must not create it again.
    tokio::time::sleep(POLL * 10).await;

    let calls = h.provider.calls();
    assert_eq!(
        creates(&calls),
        vec![&ProviderCall::Create {
            name: "c".to_string(),
            nodes: Some(1)
        }]
    );
    assert_eq!(h.provider.cluster("c").unwrap().nodes, 1);
    h.stop().await;
}

#[tokio::test]
async fn extra_cluster_survives_without_dangerous_mode() {
    let h = Harness::start(
        vec![DesiredCluster::new("a", 3)],
        InMemoryProvider::with_clusters(&["a", "b"]),
        false,
        3,
    );

    assert!(wait_for(|| h.metrics.outcome_count(Outcome::Refused.as_str()) >= 2).await);

    assert!(deletes(&h.provider.calls()).is_empty());
    assert!(h.provider.cluster("b").is_some());
    h.stop().await;
}

#[tokio::test]
async fn extra_cluster_is_deleted_in_dangerous_mode() {
    let provider = InMemoryProvider::with_clusters(&["a", "b"]);
    let id_b = provider.cluster("b").unwrap().id;
    let h = Harness::start(vec![DesiredCluster::new("a", 3)], provider, true, 1);

    assert!(wait_for(|| h.provider.cluster("b").is_none()).await);
    tokio::time::sleep(POLL * 5).await;

    let calls = h.provider.calls();
    assert_eq!(deletes(&calls), vec![&ProviderCall::Delete { id: id_b }]);
    assert!(creates(&calls).is_empty());
    assert!(h.provider.cluster("a").is_some());
    h.stop().await;
}

#[tokio::test]
async fn listing_failures_skip_cycles_until_provider_recovers() {
    let provider = InMemoryProvider::with_clusters(&["a", "b"]);
    provider.set_failing(ProviderOp::List, true);
    let h = Harness::start(vec![DesiredCluster::new("a", 3)], provider, true, 3);

    assert!(wait_for(|| h.metrics.list_error_count() >= 3).await);
    assert!(h.provider.cluster("b").is_some());

    h.provider.set_failing(ProviderOp::List, false);
    assert!(wait_for(|| h.provider.cluster("b").is_none()).await);
    h.stop().await;
}

#[tokio::test]
async fn cluster_added_by_reload_is_created_with_its_node_count() {
    let h = Harness::start(
        vec![DesiredCluster::new("a", 3)],
        InMemoryProvider::with_clusters(&["a"]),
        false,
        3,
    );
    tokio::time::sleep(POLL * 3).await;
    assert!(h.provider.calls().is_empty());

    h.desired
        .replace(vec![DesiredCluster::new("a", 3), DesiredCluster::new("d", 5)]);

    assert!(wait_for(|| h.provider.cluster("d").is_some()).await);
    assert_eq!(h.provider.cluster("d").unwrap().nodes, 5);
    h.stop().await;
}

#[tokio::test]
async fn cluster_removed_out_of_band_is_recreated() {
    let h = Harness::start(
        vec![DesiredCluster::new("a", 2)],
        InMemoryProvider::with_clusters(&["a"]),
        false,
        3,
    );
    tokio::time::sleep(POLL * 3).await;

    h.provider.remove("a");

    assert!(wait_for(|| h.provider.cluster("a").is_some()).await);
    assert_eq!(creates(&h.provider.calls()).len(), 1);
    h.stop().await;
}

/// Lists one key and never watches anything.
struct OneKey(&'static str);

#[async_trait]
impl ListerWatcher for OneKey {
    async fn list(&self) -> ProviderResult<Vec<String>> {
        Ok(vec![self.0.to_string()])
    }

    async fn watch(
        &self,
        _shutdown: watch::Receiver<bool>,
    ) -> ProviderResult<mpsc::Receiver<DriftEvent>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

/// Handler whose every call fails.
#[derive(Default)]
struct Failing {
    calls: AtomicUsize,
}

#[async_trait]
impl Handler for Failing {
    async fn add(&self, _object: &ClusterObject) -> ProviderResult<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Unavailable("always failing".to_string()))
    }

    async fn delete(&self, _object: &ClusterObject) -> ProviderResult<Outcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Unavailable("always failing".to_string()))
    }
}

#[tokio::test]
async fn failing_item_is_retried_then_dropped() {
    let handler = Arc::new(Failing::default());
    let metrics = Arc::new(ControllerMetrics::new().unwrap());
    let max_retries = 2;
    let controller = Controller::new(ControllerConfig {
        name: "failing".to_string(),
        workers: 2,
        max_retries,
        retry_delay: Duration::from_millis(10),
        lister_watcher: Arc::new(OneKey("c")),
        storage: Arc::new(ProviderStorage::new(Arc::new(InMemoryProvider::new()))),
        handler: handler.clone(),
        metrics: metrics.clone(),
    })
    .unwrap();
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(rx));

    assert!(wait_for(|| metrics.failure_count(EventKind::Added) == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1 + max_retries as usize);
    assert_eq!(metrics.retry_count(EventKind::Added), max_retries as u64);
    assert_eq!(metrics.success_count(EventKind::Added), 0);
    assert_eq!(metrics.queue_depth(), 0);

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

/// Replays a fixed batch of events on the watch channel.
struct Replay(std::sync::Mutex<Vec<DriftEvent>>);

#[async_trait]
impl ListerWatcher for Replay {
    async fn list(&self) -> ProviderResult<Vec<String>> {
        Ok(vec![])
    }

    async fn watch(
        &self,
        _shutdown: watch::Receiver<bool>,
    ) -> ProviderResult<mpsc::Receiver<DriftEvent>> {
        let events = std::mem::take(&mut *self.0.lock().unwrap());
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        Ok(rx)
    }
}

#[tokio::test]
async fn stale_delete_spares_cluster_desired_again() {
    let provider = Arc::new(InMemoryProvider::with_clusters(&["a", "b"]));
    let desired = Arc::new(DesiredState::new(vec![DesiredCluster::new("a", 3)]));
    let metrics = Arc::new(ControllerMetrics::new().unwrap());

    let detector = DriftDetector::new(
        desired.clone(),
        provider.clone(),
        metrics.clone(),
        POLL,
    );
    let events = detector.detect().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), EventKind::Deleted);

    // Reload lands before any worker picks the event up.
    desired.replace(vec![DesiredCluster::new("a", 3), DesiredCluster::new("b", 1)]);

    let controller = Controller::new(ControllerConfig {
        name: "stale".to_string(),
        workers: 1,
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
        lister_watcher: Arc::new(Replay(std::sync::Mutex::new(events))),
        storage: Arc::new(ProviderStorage::new(provider.clone())),
        handler: Arc::new(ClusterHandler::new(
            provider.clone(),
            desired.clone(),
            true,
        )),
        metrics: metrics.clone(),
    })
    .unwrap();
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(rx));

    assert!(wait_for(|| metrics.success_count(EventKind::Deleted) == 1).await);

    assert!(deletes(&provider.calls()).is_empty());
    assert!(provider.cluster("b").is_some());
    assert_eq!(metrics.outcome_count(Outcome::Unchanged.as_str()), 1);

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
