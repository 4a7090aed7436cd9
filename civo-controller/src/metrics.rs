//! Prometheus metrics for the controller.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::lister::EventKind;

/// Prefix applied to every metric name.
pub const METRICS_PREFIX: &str = "civo_controller";

/// Counters and gauges recorded by the drift detector, worker pool and
/// config reloader.
pub struct ControllerMetrics {
    registry: Registry,
    success: IntCounterVec,
    failures: IntCounterVec,
    retries: IntCounterVec,
    outcomes: IntCounterVec,
    drift_events: IntCounterVec,
    list_errors: IntCounter,
    reloads: IntCounterVec,
    queue_depth: IntGauge,
}

impl ControllerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some(METRICS_PREFIX.to_string()), None)?;

        let success = IntCounterVec::new(
            Opts::new(
                "reconcile_success_total",
                "Work items handled successfully",
            ),
            &["kind"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new(
                "reconcile_failures_total",
                "Work items dropped after exhausting retries",
            ),
            &["kind"],
        )?;
        let retries = IntCounterVec::new(
            Opts::new("reconcile_retries_total", "Work items re-queued after an error"),
            &["kind"],
        )?;
        let outcomes = IntCounterVec::new(
            Opts::new("handler_outcomes_total", "Handler results by outcome"),
            &["outcome"],
        )?;
        let drift_events = IntCounterVec::new(
            Opts::new("drift_events_total", "Drift events emitted by the detector"),
            &["kind"],
        )?;
        let list_errors = IntCounter::new(
            "provider_list_errors_total",
            "Poll cycles skipped because listing the provider failed",
        )?;
        let reloads = IntCounterVec::new(
            Opts::new("config_reloads_total", "Config file reload attempts"),
            &["result"],
        )?;
        let queue_depth = IntGauge::new("queue_depth", "Work items waiting in the queue")?;

        registry.register(Box::new(success.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(drift_events.clone()))?;
        registry.register(Box::new(list_errors.clone()))?;
        registry.register(Box::new(reloads.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            success,
            failures,
            retries,
            outcomes,
            drift_events,
            list_errors,
            reloads,
            queue_depth,
        })
    }

    pub fn success(&self, kind: EventKind) {
        self.success.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn failure(&self, kind: EventKind) {
        self.failures.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn retry(&self, kind: EventKind) {
        self.retries.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn outcome(&self, outcome: &str) {
        self.outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn drift_event(&self, kind: EventKind) {
        self.drift_events.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn list_error(&self) {
        self.list_errors.inc();
    }

    pub fn config_reload(&self, ok: bool) {
        self.reloads.with_label_values(&[reload_label(ok)]).inc();
    }

    pub fn queue_push(&self) {
        self.queue_depth.inc();
    }

    pub fn queue_pop(&self) {
        self.queue_depth.dec();
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }

    pub fn success_count(&self, kind: EventKind) -> u64 {
        self.success.with_label_values(&[kind.as_str()]).get()
    }

    pub fn failure_count(&self, kind: EventKind) -> u64 {
        self.failures.with_label_values(&[kind.as_str()]).get()
    }

    pub fn retry_count(&self, kind: EventKind) -> u64 {
        self.retries.with_label_values(&[kind.as_str()]).get()
    }

    pub fn outcome_count(&self, outcome: &str) -> u64 {
        self.outcomes.with_label_values(&[outcome]).get()
    }

    pub fn list_error_count(&self) -> u64 {
        self.list_errors.get()
    }

    pub fn reload_count(&self, ok: bool) -> u64 {
        self.reloads.with_label_values(&[reload_label(ok)]).get()
    }

    /// Export in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn reload_label(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "error"
    }
}
